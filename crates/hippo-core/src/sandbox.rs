//! Sandbox trait and job types.
//!
//! A sandbox runs one build step as an isolated unit of work (a container)
//! with resource limits. The executor composes steps into a build; the
//! sandbox knows nothing about builds, only jobs.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::log::LogLine;
use crate::{ResourceId, Result};

/// Specification for one sandbox job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Unique identifier for this job.
    pub id: ResourceId,
    /// Container image to run.
    pub image: String,
    /// Command to execute.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// Volumes to mount.
    pub mounts: Vec<Mount>,
    /// CPU and memory limits.
    pub limits: ResourceLimits,
}

/// A volume mount shared between a build's steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    /// Volume name or host path.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    pub read_only: bool,
}

/// Resource limits applied to every sandbox job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPUs, fractional allowed (e.g. 1.5).
    pub cpus: Option<f64>,
    /// Memory ceiling in bytes.
    pub memory_bytes: Option<i64>,
}

/// Handle to a spawned job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: ResourceId,
    /// Backend-specific identifier (container id).
    pub sandbox_id: String,
    /// Name of the backend that spawned the job.
    pub backend: String,
}

/// How a job ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded,
    Failed {
        exit_code: Option<i64>,
        message: String,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

/// Container-equivalent backend for build steps.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Name of this backend.
    fn backend(&self) -> &'static str;

    /// Whether the backend can currently take work.
    async fn available(&self) -> bool;

    /// Spawn a job; returns once the job is started.
    async fn spawn(&self, spec: JobSpec) -> Result<JobHandle>;

    /// Stream of log lines from a job, following until it exits.
    async fn logs(&self, handle: &JobHandle) -> Result<BoxStream<'static, LogLine>>;

    /// Wait for the job to exit.
    async fn wait(&self, handle: &JobHandle) -> Result<JobOutcome>;

    /// Stop the job and reclaim its resources.
    async fn kill(&self, handle: &JobHandle) -> Result<()>;
}
