//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {variable}: {message}")]
    InvalidValue { variable: String, message: String },

    #[error("invalid URL in {variable}: {message}")]
    InvalidUrl { variable: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
