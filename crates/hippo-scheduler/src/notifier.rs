//! Release trigger dispatch.
//!
//! Succeeded builds are handed to the release collaborator exactly once:
//! the notifier takes the store's dispatch claim before calling the
//! trigger, so duplicate passes (or competing notifiers) are no-ops. A
//! failed dispatch gives the claim back and retries with exponential
//! backoff; it never reverts the build's succeeded status.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use hippo_core::release::{ReleaseRequest, ReleaseTrigger};
use hippo_core::{BuildId, Result};
use hippo_store::BuildStore;

struct RetryState {
    failures: u32,
    next_attempt_at: DateTime<Utc>,
}

pub struct ReleaseNotifier {
    store: Arc<dyn BuildStore>,
    trigger: Arc<dyn ReleaseTrigger>,
    backoff_base: Duration,
    backoff_max: Duration,
    retries: Mutex<HashMap<BuildId, RetryState>>,
}

impl ReleaseNotifier {
    pub fn new(store: Arc<dyn BuildStore>, trigger: Arc<dyn ReleaseTrigger>) -> Self {
        Self {
            store,
            trigger,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            retries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Dispatch triggers for all pending succeeded builds.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        for build in self.store.release_pending().await? {
            if self.backing_off(build.id, now) {
                continue;
            }
            // Exactly-once: the claim is a CAS, so a concurrent notifier
            // (or a repeated pass) cannot dispatch the same build twice.
            if !self.store.claim_release(build.id).await? {
                continue;
            }

            let Some(artifact) = build.artifact.clone() else {
                // complete() commits artifact and status together, so this
                // record is corrupt; leave the claim so it is not retried.
                warn!(build_id = %build.id, "Succeeded build without artifact, skipping release");
                continue;
            };

            let request = ReleaseRequest {
                build_id: build.id,
                app_id: build.app_id,
                artifact,
            };
            match self.trigger.trigger(&request).await {
                Ok(()) => {
                    info!(build_id = %build.id, trigger = self.trigger.name(), "Release triggered");
                    self.store.mark_released(build.id).await?;
                    self.lock_retries().remove(&build.id);
                }
                Err(e) => {
                    warn!(build_id = %build.id, error = %e, "Release trigger failed, will retry");
                    self.store.unclaim_release(build.id).await?;
                    self.schedule_retry(build.id, now);
                }
            }
        }
        Ok(())
    }

    fn backing_off(&self, id: BuildId, now: DateTime<Utc>) -> bool {
        self.lock_retries()
            .get(&id)
            .is_some_and(|state| state.next_attempt_at > now)
    }

    fn schedule_retry(&self, id: BuildId, now: DateTime<Utc>) {
        let mut retries = self.lock_retries();
        let failures = retries.get(&id).map(|s| s.failures).unwrap_or(0) + 1;
        let delay = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(failures.saturating_sub(1)))
            .min(self.backoff_max);
        let next_attempt_at = now + delay;
        retries.insert(
            id,
            RetryState {
                failures,
                next_attempt_at,
            },
        );
    }

    fn lock_retries(&self) -> std::sync::MutexGuard<'_, HashMap<BuildId, RetryState>> {
        self.retries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the dispatch loop on an interval.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = self.tick(Utc::now()).await {
                    warn!(error = %e, "Release dispatch tick failed");
                }
            }
        })
    }
}
