//! API routes.

pub mod apps;
pub mod builds;
pub mod health;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/builds", builds::router())
        .nest("/apps", apps::router())
        .merge(health::router())
        .with_state(state)
}
