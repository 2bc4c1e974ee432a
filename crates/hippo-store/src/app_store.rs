//! Application record store trait.

use async_trait::async_trait;

use hippo_core::app::App;
use hippo_core::{AppId, Result};

/// Minimal application registry backing build ownership.
#[async_trait]
pub trait AppStore: Send + Sync {
    /// Register an application. Names are unique; duplicates yield `Conflict`.
    async fn create(&self, name: &str, hostname: &str) -> Result<App>;

    async fn get(&self, id: AppId) -> Result<App>;

    /// All applications, ordered by name.
    async fn list(&self) -> Result<Vec<App>>;
}
