//! Build record store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use hippo_core::build::{ArtifactRef, Build, FailureReason, SourceRef};
use hippo_core::log::{LogEntry, LogStream};
use hippo_core::{AppId, BuildId, Result};

/// Single source of truth for build records.
///
/// Reads and writes are linearizable per build id. Mutations that carry a
/// lease `token` commit only while that token is the build's current lease
/// (fencing against stale executors); all guarded mutations fail with
/// `Conflict` when their expectation does not hold, and with `NotFound` for
/// an unknown id.
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Insert a new build: status queued, empty log, no artifact.
    async fn create(&self, app_id: AppId, source: SourceRef) -> Result<Build>;

    async fn get(&self, id: BuildId) -> Result<Build>;

    /// An application's builds, newest first. Archived records are excluded.
    async fn list(&self, app_id: AppId) -> Result<Vec<Build>>;

    /// Claim the oldest queued build: sets running, stamps `started_at`,
    /// increments the attempt counter and installs a fresh lease. Concurrent
    /// acquirers never receive the same build. `None` when the queue is empty.
    async fn acquire(&self, holder: &str, ttl: Duration) -> Result<Option<Build>>;

    /// Extend the lease of a running build.
    async fn renew_lease(&self, id: BuildId, token: Uuid, ttl: Duration) -> Result<()>;

    /// Commit success: artifact reference and the succeeded status become
    /// visible in one atomic step.
    async fn complete(&self, id: BuildId, token: Uuid, artifact: ArtifactRef) -> Result<Build>;

    /// Commit a terminal failure with its reason.
    async fn fail(&self, id: BuildId, token: Uuid, reason: FailureReason) -> Result<Build>;

    /// Commit cancellation observed cooperatively by the executor.
    async fn finish_cancelled(&self, id: BuildId, token: Uuid) -> Result<Build>;

    /// Return a running build to the queue after lease loss.
    async fn requeue(&self, id: BuildId, token: Uuid) -> Result<Build>;

    /// User-requested cancellation. Queued builds transition directly to
    /// cancelled; running builds get the cooperative flag set (idempotent).
    /// Terminal builds yield `Conflict`.
    async fn request_cancel(&self, id: BuildId) -> Result<Build>;

    /// Whether cancellation has been requested; polled by the executor at
    /// step boundaries.
    async fn cancel_requested(&self, id: BuildId) -> Result<bool>;

    /// Controller backstop: terminal-mark a running build that outlived its
    /// cancellation grace period, clearing the lease.
    async fn force_cancel(&self, id: BuildId) -> Result<Build>;

    /// Soft delete: cancel if still active, retain the record. Idempotent.
    async fn archive(&self, id: BuildId) -> Result<Build>;

    /// Append one line to the build's ordered log.
    async fn append_log(&self, id: BuildId, step: &str, stream: LogStream, line: &str)
    -> Result<()>;

    /// Read a slice of the build's log.
    async fn logs(&self, id: BuildId, offset: u64, limit: u64) -> Result<Vec<LogEntry>>;

    /// Running builds whose lease expired at or before `now`.
    async fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Build>>;

    /// Running builds whose cancellation request is older than `grace`.
    async fn cancel_overdue(&self, now: DateTime<Utc>, grace: Duration) -> Result<Vec<Build>>;

    /// Succeeded builds whose release trigger has not been claimed yet.
    async fn release_pending(&self) -> Result<Vec<Build>>;

    /// Claim the release dispatch for a succeeded build. Returns false when
    /// the claim is already taken or dispatched; the caller must not
    /// trigger in that case.
    async fn claim_release(&self, id: BuildId) -> Result<bool>;

    /// Record a successful dispatch.
    async fn mark_released(&self, id: BuildId) -> Result<()>;

    /// Give the claim back after a failed dispatch so it can be retried.
    async fn unclaim_release(&self, id: BuildId) -> Result<()>;
}
