//! Environment-driven configuration for Hippo.
//!
//! All settings come from `PEGASUS_*` environment variables with documented
//! defaults. The result is an explicit [`Config`] struct passed into process
//! startup; nothing reads the environment after boot.

pub mod error;
pub mod settings;

pub use error::{ConfigError, ConfigResult};
pub use settings::{Config, DatabaseConfig, OrchestratorConfig, SandboxConfig, ServerConfig};
