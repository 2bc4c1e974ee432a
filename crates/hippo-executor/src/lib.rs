//! Build execution for the Hippo platform.
//!
//! The executor drives one build through its steps (fetch, build, export),
//! each an isolated sandbox job with resource limits. Logs stream to the
//! build record store; cancellation is observed cooperatively at
//! checkpoints.

pub mod docker;
pub mod runner;
pub mod steps;

pub use docker::DockerSandbox;
pub use runner::{BuildExecutor, RunOutcome};
pub use steps::{ExecutionSettings, Step};
