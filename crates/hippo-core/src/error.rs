//! Error types for Hippo.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// No executor capacity; the work stays queued rather than failing.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("step {step} failed: {cause}")]
    Execution { step: String, cause: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Transient infrastructure faults are retried inside the executor
    /// before escalating to a terminal failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ResourceExhausted(_) | Error::Internal(_) | Error::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
