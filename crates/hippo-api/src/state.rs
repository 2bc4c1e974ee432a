//! Application state.

use std::sync::Arc;

use hippo_config::Config;
use hippo_store::{AppStore, BuildStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub builds: Arc<dyn BuildStore>,
    pub apps: Arc<dyn AppStore>,
    /// Suffix for generated app hostnames.
    pub default_domain: String,
    /// Opaque platform setting, surfaced to clients that need it.
    pub registration_mode: String,
}

impl AppState {
    pub fn new(builds: Arc<dyn BuildStore>, apps: Arc<dyn AppStore>, config: &Config) -> Self {
        Self {
            builds,
            apps,
            default_domain: config.default_domain.clone(),
            registration_mode: config.registration_mode.clone(),
        }
    }
}
