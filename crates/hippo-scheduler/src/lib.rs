//! Build scheduling for the Hippo platform.
//!
//! Workers pull queued builds through lease acquisition, so each build is
//! processed by exactly one executor at a time. The lifecycle controller
//! reaps expired leases and enforces cancellation grace periods; the
//! release notifier dispatches triggers for succeeded builds with backoff.

pub mod controller;
pub mod notifier;
pub mod worker;

pub use controller::LifecycleController;
pub use notifier::ReleaseNotifier;
pub use worker::{Worker, WorkerConfig, WorkerPool};
