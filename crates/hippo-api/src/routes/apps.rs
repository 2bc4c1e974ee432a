//! Application registry endpoints.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use hippo_core::AppId;
use hippo_core::app::{App, validate_name};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_apps))
        .route("/new/", post(create_app))
        .route("/{id}/", get(get_app))
}

#[derive(Debug, Serialize)]
struct AppResponse {
    id: String,
    name: String,
    hostname: String,
    created_at: DateTime<Utc>,
}

impl From<App> for AppResponse {
    fn from(app: App) -> Self {
        Self {
            id: app.id.to_string(),
            name: app.name,
            hostname: app.hostname,
            created_at: app.created_at,
        }
    }
}

async fn list_apps(State(state): State<AppState>) -> Result<Json<Vec<AppResponse>>, ApiError> {
    let apps = state.apps.list().await?;
    Ok(Json(apps.into_iter().map(AppResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
struct CreateAppRequest {
    name: String,
    /// Overrides the generated `{name}.{default_domain}` hostname.
    hostname: Option<String>,
}

async fn create_app(
    State(state): State<AppState>,
    Json(req): Json<CreateAppRequest>,
) -> Result<Json<AppResponse>, ApiError> {
    validate_name(&req.name)?;
    let hostname = req
        .hostname
        .unwrap_or_else(|| format!("{}.{}", req.name, state.default_domain));

    let app = state.apps.create(&req.name, &hostname).await?;
    tracing::info!(app_id = %app.id, name = %app.name, "Application registered");
    Ok(Json(app.into()))
}

async fn get_app(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AppResponse>, ApiError> {
    let app = state.apps.get(AppId::from_uuid(id)).await?;
    Ok(Json(app.into()))
}
