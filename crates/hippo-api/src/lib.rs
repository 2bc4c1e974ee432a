//! Control-plane API server for the Hippo platform.
//!
//! Synchronous, short-lived request handlers over the record stores; the
//! build pipeline itself runs in the scheduler's background tasks.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
