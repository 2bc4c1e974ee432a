//! Build lifecycle controller.
//!
//! Two periodic passes over the store keep the state machine honest when
//! executors misbehave: expired leases are reaped (requeue, or fail once
//! the attempt budget is spent) and cancellation requests that outlived
//! the grace period are forced terminal.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hippo_core::Result;
use hippo_core::build::FailureReason;
use hippo_store::BuildStore;

pub struct LifecycleController {
    store: Arc<dyn BuildStore>,
    /// Lease acquisitions a build gets before a timeout becomes terminal.
    max_attempts: u32,
    /// How long a running build gets to honor a cancellation request.
    cancel_grace: Duration,
}

impl LifecycleController {
    pub fn new(store: Arc<dyn BuildStore>, max_attempts: u32, cancel_grace: Duration) -> Self {
        Self {
            store,
            max_attempts,
            cancel_grace,
        }
    }

    /// One maintenance pass. Both sub-passes are plain store calls so tests
    /// can drive the controller with a synthetic clock.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        self.reap_expired(now).await?;
        self.enforce_cancellations(now).await
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<()> {
        for build in self.store.expired_leases(now).await? {
            let Some(lease) = &build.lease else { continue };

            let result = if build.cancel_requested_at.is_some() {
                // Cancellation was already requested; requeueing would only
                // bounce the build through another executor.
                info!(build_id = %build.id, "Lease expired on a cancel-requested build, forcing");
                self.store.force_cancel(build.id).await
            } else if build.attempt >= self.max_attempts {
                info!(build_id = %build.id, attempt = build.attempt, "Lease expired, retry budget spent");
                self.store
                    .fail(
                        build.id,
                        lease.token,
                        FailureReason::Timeout {
                            message: format!(
                                "lease expired after {} of {} attempts",
                                build.attempt, self.max_attempts
                            ),
                        },
                    )
                    .await
            } else {
                info!(build_id = %build.id, attempt = build.attempt, "Lease expired, requeueing");
                self.store.requeue(build.id, lease.token).await
            };

            // Lost races just mean the holder committed first.
            if let Err(e) = result {
                debug!(build_id = %build.id, error = %e, "Reap skipped");
            }
        }
        Ok(())
    }

    async fn enforce_cancellations(&self, now: DateTime<Utc>) -> Result<()> {
        for build in self.store.cancel_overdue(now, self.cancel_grace).await? {
            warn!(build_id = %build.id, "Cancellation grace period elapsed, forcing");
            if let Err(e) = self.store.force_cancel(build.id).await {
                debug!(build_id = %build.id, error = %e, "Force-cancel skipped");
            }
        }
        Ok(())
    }

    /// Run the maintenance loop on an interval.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = self.tick(Utc::now()).await {
                    warn!(error = %e, "Lifecycle tick failed");
                }
            }
        })
    }
}
