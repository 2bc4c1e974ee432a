//! Record stores for the Hippo platform.
//!
//! The build store is the single source of truth for build state. Every
//! lifecycle mutation is a compare-and-set: callers state what they expect
//! (current status, lease token) and get `Conflict` when the expectation no
//! longer holds. Two backends: an in-memory arena for tests and single-node
//! development, and PostgreSQL for real deployments.

pub mod app_store;
pub mod build_store;
pub mod memory;
pub mod postgres;

pub use app_store::AppStore;
pub use build_store::BuildStore;
pub use memory::{MemoryAppStore, MemoryBuildStore};
pub use postgres::{PgAppStore, PgBuildStore};

use hippo_core::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| Error::Internal(format!("database: {e}")))?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Internal(format!("migration: {e}")))?;
    Ok(())
}
