//! The build executor: drives one build through its steps.

use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use hippo_core::build::{ArtifactRef, Build, FailureReason};
use hippo_core::log::LogStream;
use hippo_core::sandbox::{JobOutcome, Sandbox};
use hippo_core::Result;
use hippo_store::BuildStore;

use crate::steps::{ExecutionSettings, Step, artifact_image};

/// How a build run ended, from the worker's point of view.
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded(ArtifactRef),
    Failed(FailureReason),
    Cancelled,
}

enum StepResult {
    Completed,
    Failed(FailureReason),
    Cancelled,
    DeadlineExceeded,
}

/// Runs builds step by step in a sandbox, streaming logs to the store.
///
/// The cancellation flag is checked at every step boundary and polled while
/// a step runs; the wall-clock deadline is enforced the same way. Errors
/// returned from [`run`](Self::run) are store failures only; build
/// failures come back as a [`RunOutcome`].
pub struct BuildExecutor {
    sandbox: Arc<dyn Sandbox>,
    store: Arc<dyn BuildStore>,
    settings: ExecutionSettings,
}

impl BuildExecutor {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        store: Arc<dyn BuildStore>,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            sandbox,
            store,
            settings,
        }
    }

    /// Execute the build's steps until completion, failure, cancellation or
    /// the deadline.
    pub async fn run(&self, build: &Build, deadline: Instant) -> Result<RunOutcome> {
        for step in Step::ALL {
            if self.store.cancel_requested(build.id).await? {
                self.system_log(build, step, "cancellation observed, stopping")
                    .await;
                return Ok(RunOutcome::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(RunOutcome::Failed(timeout_reason()));
            }

            match self.run_step(build, step, deadline).await? {
                StepResult::Completed => {}
                StepResult::Failed(reason) => return Ok(RunOutcome::Failed(reason)),
                StepResult::Cancelled => return Ok(RunOutcome::Cancelled),
                StepResult::DeadlineExceeded => {
                    return Ok(RunOutcome::Failed(timeout_reason()));
                }
            }
        }

        Ok(RunOutcome::Succeeded(ArtifactRef {
            image: artifact_image(build, &self.settings),
            created_at: Utc::now(),
        }))
    }

    /// One step, with bounded retries for transient sandbox failures.
    async fn run_step(&self, build: &Build, step: Step, deadline: Instant) -> Result<StepResult> {
        self.system_log(build, step, "starting").await;

        let mut attempts = 0;
        loop {
            match self.try_step(build, step, deadline).await {
                Ok(result) => {
                    if let StepResult::Failed(FailureReason::Execution { cause, .. }) = &result {
                        self.system_log(build, step, &format!("failed: {cause}")).await;
                        info!(build_id = %build.id, step = step.name(), "Step failed");
                    }
                    return Ok(result);
                }
                Err(e) if e.is_transient() && attempts < self.settings.step_retries => {
                    attempts += 1;
                    warn!(build_id = %build.id, step = step.name(), error = %e, attempt = attempts, "Transient step failure, retrying");
                    self.system_log(
                        build,
                        step,
                        &format!(
                            "transient failure ({e}), retrying {attempts}/{}",
                            self.settings.step_retries
                        ),
                    )
                    .await;
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                }
                Err(e) => {
                    return Ok(StepResult::Failed(FailureReason::Execution {
                        step: step.name().to_string(),
                        cause: e.to_string(),
                    }));
                }
            }
        }
    }

    /// Spawn and supervise one sandbox job for the step.
    async fn try_step(&self, build: &Build, step: Step, deadline: Instant) -> Result<StepResult> {
        let spec = step.spec(build, &self.settings);
        let handle = self.sandbox.spawn(spec).await?;

        let log_stream = match self.sandbox.logs(&handle).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = self.sandbox.kill(&handle).await;
                return Err(e);
            }
        };

        let store = self.store.clone();
        let build_id = build.id;
        let step_name = step.name();
        let forward = tokio::spawn(async move {
            let mut stream = log_stream;
            while let Some(line) = stream.next().await {
                if let Err(e) = store
                    .append_log(build_id, step_name, line.stream, &line.line)
                    .await
                {
                    warn!(build_id = %build_id, error = %e, "Failed to store log line");
                    break;
                }
            }
        });

        let mut wait = self.sandbox.wait(&handle);
        let outcome = loop {
            tokio::select! {
                result = &mut wait => {
                    match result {
                        Ok(outcome) => break outcome,
                        Err(e) => {
                            forward.abort();
                            let _ = forward.await;
                            return Err(e);
                        }
                    }
                }
                _ = tokio::time::sleep(self.settings.cancel_poll) => {
                    if self.store.cancel_requested(build.id).await.unwrap_or(false) {
                        let _ = self.sandbox.kill(&handle).await;
                        forward.abort();
                        let _ = forward.await;
                        self.system_log(build, step, "cancellation observed, job killed").await;
                        return Ok(StepResult::Cancelled);
                    }
                    if Instant::now() >= deadline {
                        let _ = self.sandbox.kill(&handle).await;
                        forward.abort();
                        let _ = forward.await;
                        return Ok(StepResult::DeadlineExceeded);
                    }
                }
            }
        };

        // The job is done; let straggling log lines drain, then stop.
        forward.abort();
        let _ = forward.await;

        match outcome {
            JobOutcome::Succeeded => Ok(StepResult::Completed),
            JobOutcome::Failed { exit_code, message } => {
                let cause = match (exit_code, message.is_empty()) {
                    (Some(code), true) => format!("nonzero exit ({code})"),
                    (Some(code), false) => format!("nonzero exit ({code}): {message}"),
                    (None, false) => message,
                    (None, true) => "job ended abnormally".to_string(),
                };
                Ok(StepResult::Failed(FailureReason::Execution {
                    step: step.name().to_string(),
                    cause,
                }))
            }
        }
    }

    async fn system_log(&self, build: &Build, step: Step, message: &str) {
        if let Err(e) = self
            .store
            .append_log(build.id, step.name(), LogStream::System, message)
            .await
        {
            warn!(build_id = %build.id, error = %e, "Failed to store system log line");
        }
    }
}

fn timeout_reason() -> FailureReason {
    FailureReason::Timeout {
        message: "build exceeded its wall-clock budget".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use hippo_core::build::SourceRef;
    use hippo_core::{AppId, Error};
    use hippo_core::log::LogLine;
    use hippo_core::sandbox::{JobHandle, JobSpec};
    use hippo_store::{BuildStore, MemoryBuildStore};

    #[derive(Clone)]
    enum Plan {
        SpawnError(String),
        Job {
            lines: Vec<&'static str>,
            outcome: JobOutcome,
        },
        Hang,
    }

    /// Sandbox that plays back a scripted sequence of job behaviors.
    struct ScriptedSandbox {
        plan: Mutex<VecDeque<Plan>>,
        active: Mutex<HashMap<String, Plan>>,
        spawn_attempts: AtomicUsize,
        kills: AtomicUsize,
        counter: AtomicUsize,
    }

    impl ScriptedSandbox {
        fn new(plan: Vec<Plan>) -> Self {
            Self {
                plan: Mutex::new(plan.into_iter().collect()),
                active: Mutex::new(HashMap::new()),
                spawn_attempts: AtomicUsize::new(0),
                kills: AtomicUsize::new(0),
                counter: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        fn backend(&self) -> &'static str {
            "scripted"
        }

        async fn available(&self) -> bool {
            true
        }

        async fn spawn(&self, spec: JobSpec) -> Result<JobHandle> {
            self.spawn_attempts.fetch_add(1, Ordering::SeqCst);
            let next = self
                .plan
                .lock()
                .unwrap()
                .pop_front()
                .expect("plan exhausted");
            match next {
                Plan::SpawnError(message) => Err(Error::Internal(message)),
                plan => {
                    let sandbox_id =
                        format!("job-{}", self.counter.fetch_add(1, Ordering::SeqCst));
                    self.active.lock().unwrap().insert(sandbox_id.clone(), plan);
                    Ok(JobHandle {
                        id: spec.id,
                        sandbox_id,
                        backend: "scripted".to_string(),
                    })
                }
            }
        }

        async fn logs(&self, handle: &JobHandle) -> Result<BoxStream<'static, LogLine>> {
            let plan = self
                .active
                .lock()
                .unwrap()
                .get(&handle.sandbox_id)
                .cloned()
                .expect("unknown job");
            let lines = match plan {
                Plan::Job { lines, .. } => lines,
                _ => vec![],
            };
            let entries: Vec<LogLine> = lines
                .into_iter()
                .map(|line| LogLine {
                    timestamp: Utc::now(),
                    stream: LogStream::Stdout,
                    line: line.to_string(),
                })
                .collect();
            Ok(Box::pin(stream::iter(entries)))
        }

        async fn wait(&self, handle: &JobHandle) -> Result<JobOutcome> {
            let plan = self
                .active
                .lock()
                .unwrap()
                .get(&handle.sandbox_id)
                .cloned()
                .expect("unknown job");
            match plan {
                Plan::Job { outcome, .. } => Ok(outcome),
                Plan::Hang => futures::future::pending().await,
                Plan::SpawnError(_) => unreachable!(),
            }
        }

        async fn kill(&self, _handle: &JobHandle) -> Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ok_job() -> Plan {
        Plan::Job {
            lines: vec!["ok"],
            outcome: JobOutcome::Succeeded,
        }
    }

    fn settings() -> ExecutionSettings {
        let mut settings = ExecutionSettings::new("hippo/builder:latest");
        settings.cancel_poll = Duration::from_millis(10);
        settings
    }

    async fn running_build(store: &MemoryBuildStore) -> Build {
        let source = SourceRef::Git {
            url: "https://git.example.com/org/app.git".to_string(),
            reference: None,
            commit: None,
        };
        store.create(AppId::new(), source).await.unwrap();
        store
            .acquire("worker-test", Duration::from_secs(600))
            .await
            .unwrap()
            .unwrap()
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    #[tokio::test]
    async fn successful_run_produces_artifact_and_logs() {
        let store = Arc::new(MemoryBuildStore::new());
        let sandbox = Arc::new(ScriptedSandbox::new(vec![ok_job(), ok_job(), ok_job()]));
        let build = running_build(&store).await;
        let executor = BuildExecutor::new(sandbox.clone(), store.clone(), settings());

        let outcome = executor.run(&build, far_deadline()).await.unwrap();
        let RunOutcome::Succeeded(artifact) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert!(artifact.image.starts_with("hippo/app-"));
        assert_eq!(sandbox.spawn_attempts.load(Ordering::SeqCst), 3);

        let logs = store.logs(build.id, 0, 100).await.unwrap();
        for step in ["fetch", "build", "export"] {
            assert!(
                logs.iter().any(|e| e.step == step),
                "expected log lines for step {step}"
            );
        }
    }

    #[tokio::test]
    async fn failing_step_stops_the_run() {
        let store = Arc::new(MemoryBuildStore::new());
        // Fetch succeeds, build exits nonzero; export must never start.
        let sandbox = Arc::new(ScriptedSandbox::new(vec![
            ok_job(),
            Plan::Job {
                lines: vec!["cc: error"],
                outcome: JobOutcome::Failed {
                    exit_code: Some(2),
                    message: String::new(),
                },
            },
        ]));
        let build = running_build(&store).await;
        let executor = BuildExecutor::new(sandbox.clone(), store.clone(), settings());

        let outcome = executor.run(&build, far_deadline()).await.unwrap();
        let RunOutcome::Failed(FailureReason::Execution { step, cause }) = outcome else {
            panic!("expected execution failure, got {outcome:?}");
        };
        assert_eq!(step, "build");
        assert!(cause.contains("nonzero exit (2)"));
        assert_eq!(sandbox.spawn_attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_spawn_failures_are_retried() {
        let store = Arc::new(MemoryBuildStore::new());
        let sandbox = Arc::new(ScriptedSandbox::new(vec![
            Plan::SpawnError("daemon hiccup".to_string()),
            ok_job(),
            ok_job(),
            ok_job(),
        ]));
        let build = running_build(&store).await;
        let executor = BuildExecutor::new(sandbox.clone(), store.clone(), settings());

        let outcome = executor.run(&build, far_deadline()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Succeeded(_)));
        assert_eq!(sandbox.spawn_attempts.load(Ordering::SeqCst), 4);

        let logs = store.logs(build.id, 0, 100).await.unwrap();
        assert!(logs.iter().any(|e| e.line.contains("retrying")));
    }

    #[tokio::test]
    async fn retries_exhaust_into_execution_failure() {
        let store = Arc::new(MemoryBuildStore::new());
        let sandbox = Arc::new(ScriptedSandbox::new(vec![Plan::SpawnError(
            "daemon down".to_string(),
        )]));
        let build = running_build(&store).await;
        let mut settings = settings();
        settings.step_retries = 0;
        let executor = BuildExecutor::new(sandbox, store.clone(), settings);

        let outcome = executor.run(&build, far_deadline()).await.unwrap();
        let RunOutcome::Failed(FailureReason::Execution { step, cause }) = outcome else {
            panic!("expected execution failure, got {outcome:?}");
        };
        assert_eq!(step, "fetch");
        assert!(cause.contains("daemon down"));
    }

    #[tokio::test]
    async fn cancellation_at_step_boundary() {
        let store = Arc::new(MemoryBuildStore::new());
        let sandbox = Arc::new(ScriptedSandbox::new(vec![]));
        let build = running_build(&store).await;
        store.request_cancel(build.id).await.unwrap();
        let executor = BuildExecutor::new(sandbox.clone(), store.clone(), settings());

        let outcome = executor.run(&build, far_deadline()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled));
        assert_eq!(sandbox.spawn_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_mid_step_kills_the_job() {
        let store = Arc::new(MemoryBuildStore::new());
        let sandbox = Arc::new(ScriptedSandbox::new(vec![Plan::Hang]));
        let build = running_build(&store).await;
        let executor = Arc::new(BuildExecutor::new(
            sandbox.clone(),
            store.clone(),
            settings(),
        ));

        let task = {
            let executor = executor.clone();
            let build = build.clone();
            tokio::spawn(async move { executor.run(&build, far_deadline()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.request_cancel(build.id).await.unwrap();

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled));
        assert_eq!(sandbox.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn past_deadline_fails_with_timeout() {
        let store = Arc::new(MemoryBuildStore::new());
        let sandbox = Arc::new(ScriptedSandbox::new(vec![]));
        let build = running_build(&store).await;
        let executor = BuildExecutor::new(sandbox.clone(), store.clone(), settings());

        let outcome = executor.run(&build, Instant::now()).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failed(FailureReason::Timeout { .. })
        ));
        assert_eq!(sandbox.spawn_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deadline_mid_step_kills_the_job() {
        let store = Arc::new(MemoryBuildStore::new());
        let sandbox = Arc::new(ScriptedSandbox::new(vec![Plan::Hang]));
        let build = running_build(&store).await;
        let executor = BuildExecutor::new(sandbox.clone(), store.clone(), settings());

        let deadline = Instant::now() + Duration::from_millis(50);
        let outcome = executor.run(&build, deadline).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failed(FailureReason::Timeout { .. })
        ));
        assert_eq!(sandbox.kills.load(Ordering::SeqCst), 1);
    }
}
