//! Workers that claim and execute builds.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

use hippo_core::Result;
use hippo_core::build::Build;
use hippo_executor::{BuildExecutor, RunOutcome};
use hippo_store::BuildStore;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Lease duration; renewed on a heartbeat well inside it.
    pub lease_ttl: Duration,
    /// Idle wait between queue polls.
    pub poll_interval: Duration,
    /// Wall-clock budget for one build.
    pub build_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            build_timeout: Duration::from_secs(1800),
        }
    }
}

/// A worker that claims queued builds and runs them to completion.
pub struct Worker {
    id: String,
    store: Arc<dyn BuildStore>,
    executor: Arc<BuildExecutor>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn BuildStore>,
        executor: Arc<BuildExecutor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            executor,
            config,
        }
    }

    /// Run the worker loop.
    pub async fn run(&self) {
        info!(worker_id = %self.id, "Starting worker");

        loop {
            match self.process_one().await {
                Ok(true) => {}
                Ok(false) => sleep(self.config.poll_interval).await,
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Failed to claim build");
                    sleep(self.config.poll_interval * 5).await;
                }
            }
        }
    }

    /// Claim and process at most one build. Returns whether work was done.
    pub async fn process_one(&self) -> Result<bool> {
        let Some(build) = self.store.acquire(&self.id, self.config.lease_ttl).await? else {
            return Ok(false);
        };
        self.process(build).await;
        Ok(true)
    }

    async fn process(&self, build: Build) {
        let Some(lease) = build.lease.clone() else {
            error!(build_id = %build.id, "Claimed build has no lease");
            return;
        };
        let token = lease.token;
        info!(worker_id = %self.id, build_id = %build.id, attempt = build.attempt, "Claimed build");

        let heartbeat = self.spawn_heartbeat(&build);

        let deadline = Instant::now() + self.config.build_timeout;
        let result = self.executor.run(&build, deadline).await;

        heartbeat.abort();
        let _ = heartbeat.await;

        // Every commit is fenced by the lease token; losing the race here
        // means the controller already transitioned the build.
        let committed = match result {
            Ok(RunOutcome::Succeeded(artifact)) => {
                info!(build_id = %build.id, image = %artifact.image, "Build succeeded");
                self.store.complete(build.id, token, artifact).await
            }
            Ok(RunOutcome::Failed(reason)) => {
                info!(build_id = %build.id, ?reason, "Build failed");
                self.store.fail(build.id, token, reason).await
            }
            Ok(RunOutcome::Cancelled) => {
                info!(build_id = %build.id, "Build cancelled");
                self.store.finish_cancelled(build.id, token).await
            }
            Err(e) => {
                // Store failure mid-run: leave the build alone, the lease
                // will expire and the reaper requeues or fails it.
                error!(build_id = %build.id, error = %e, "Build run aborted on store failure");
                return;
            }
        };

        if let Err(e) = committed {
            warn!(worker_id = %self.id, build_id = %build.id, error = %e, "Commit lost to a concurrent transition");
        }
    }

    fn spawn_heartbeat(&self, build: &Build) -> JoinHandle<()> {
        let store = self.store.clone();
        let build_id = build.id;
        let token = build.lease.as_ref().map(|l| l.token);
        let ttl = self.config.lease_ttl;
        // Renew at a third of the TTL so one missed beat is survivable.
        let period = (ttl / 3).max(Duration::from_millis(100));

        tokio::spawn(async move {
            let Some(token) = token else { return };
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = store.renew_lease(build_id, token, ttl).await {
                    warn!(build_id = %build_id, error = %e, "Lease renewal failed, stopping heartbeat");
                    break;
                }
            }
        })
    }
}

/// Spawns a fixed-size pool of workers.
pub struct WorkerPool;

impl WorkerPool {
    pub fn spawn(
        count: usize,
        store: Arc<dyn BuildStore>,
        executor: Arc<BuildExecutor>,
        config: WorkerConfig,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|i| {
                let worker = Worker::new(
                    format!("worker-{i}"),
                    store.clone(),
                    executor.clone(),
                    config.clone(),
                );
                tokio::spawn(async move { worker.run().await })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};

    use hippo_core::build::{BuildStatus, SourceRef};
    use hippo_core::log::LogLine;
    use hippo_core::sandbox::{JobHandle, JobOutcome, JobSpec, Sandbox};
    use hippo_core::{AppId, Error};
    use hippo_executor::ExecutionSettings;
    use hippo_store::MemoryBuildStore;

    /// Sandbox whose jobs all finish instantly with a fixed outcome.
    struct FixedSandbox {
        outcome: fn() -> hippo_core::Result<JobOutcome>,
    }

    #[async_trait]
    impl Sandbox for FixedSandbox {
        fn backend(&self) -> &'static str {
            "fixed"
        }

        async fn available(&self) -> bool {
            true
        }

        async fn spawn(&self, spec: JobSpec) -> hippo_core::Result<JobHandle> {
            Ok(JobHandle {
                id: spec.id,
                sandbox_id: "fixed".to_string(),
                backend: "fixed".to_string(),
            })
        }

        async fn logs(&self, _handle: &JobHandle) -> hippo_core::Result<BoxStream<'static, LogLine>> {
            Ok(Box::pin(stream::empty()))
        }

        async fn wait(&self, _handle: &JobHandle) -> hippo_core::Result<JobOutcome> {
            (self.outcome)()
        }

        async fn kill(&self, _handle: &JobHandle) -> hippo_core::Result<()> {
            Ok(())
        }
    }

    fn worker_with(
        store: Arc<MemoryBuildStore>,
        outcome: fn() -> hippo_core::Result<JobOutcome>,
    ) -> Worker {
        let sandbox = Arc::new(FixedSandbox { outcome });
        let mut settings = ExecutionSettings::new("hippo/builder:latest");
        settings.step_retries = 0;
        let executor = Arc::new(BuildExecutor::new(sandbox, store.clone(), settings));
        Worker::new("worker-test", store, executor, WorkerConfig::default())
    }

    async fn queued_build(store: &MemoryBuildStore) -> hippo_core::BuildId {
        let source = SourceRef::Git {
            url: "https://git.example.com/org/app.git".to_string(),
            reference: None,
            commit: None,
        };
        store.create(AppId::new(), source).await.unwrap().id
    }

    #[tokio::test]
    async fn idle_worker_reports_no_work() {
        let store = Arc::new(MemoryBuildStore::new());
        let worker = worker_with(store, || Ok(JobOutcome::Succeeded));
        assert!(!worker.process_one().await.unwrap());
    }

    #[tokio::test]
    async fn successful_build_commits_artifact_atomically() {
        let store = Arc::new(MemoryBuildStore::new());
        let id = queued_build(&store).await;
        let worker = worker_with(store.clone(), || Ok(JobOutcome::Succeeded));

        assert!(worker.process_one().await.unwrap());

        let build = store.get(id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Succeeded);
        assert!(build.artifact.is_some());
        assert!(build.lease.is_none());
        assert!(build.finished_at.is_some());
    }

    #[tokio::test]
    async fn failing_build_records_reason() {
        let store = Arc::new(MemoryBuildStore::new());
        let id = queued_build(&store).await;
        let worker = worker_with(store.clone(), || {
            Ok(JobOutcome::Failed {
                exit_code: Some(1),
                message: String::new(),
            })
        });

        assert!(worker.process_one().await.unwrap());

        let build = store.get(id).await.unwrap();
        assert!(matches!(build.status, BuildStatus::Failed { .. }));
        assert!(build.artifact.is_none());
    }

    #[tokio::test]
    async fn sandbox_errors_surface_as_execution_failure() {
        let store = Arc::new(MemoryBuildStore::new());
        let id = queued_build(&store).await;
        let worker = worker_with(store.clone(), || {
            Err(Error::Internal("daemon down".to_string()))
        });

        assert!(worker.process_one().await.unwrap());

        let build = store.get(id).await.unwrap();
        assert!(matches!(build.status, BuildStatus::Failed { .. }));
    }
}
