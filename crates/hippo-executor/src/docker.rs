//! Docker sandbox backend.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, info, warn};

use hippo_core::log::{LogLine, LogStream};
use hippo_core::sandbox::{JobHandle, JobOutcome, JobSpec, Mount, ResourceLimits, Sandbox};
use hippo_core::{Error, Result};

/// Runs build-step jobs as local Docker containers.
pub struct DockerSandbox {
    docker: Docker,
}

impl DockerSandbox {
    /// Connect to the local Docker daemon.
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_name(job_id: &hippo_core::ResourceId) -> String {
        format!("hippo-build-{job_id}")
    }

    fn host_config(limits: &ResourceLimits, mounts: &[Mount]) -> HostConfig {
        let binds: Option<Vec<String>> = if mounts.is_empty() {
            None
        } else {
            Some(
                mounts
                    .iter()
                    .map(|m| {
                        let mode = if m.read_only { "ro" } else { "rw" };
                        format!("{}:{}:{}", m.source, m.target, mode)
                    })
                    .collect(),
            )
        };

        HostConfig {
            binds,
            memory: limits.memory_bytes,
            nano_cpus: limits.cpus.map(|cpus| (cpus * 1e9) as i64),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn backend(&self) -> &'static str {
        "docker"
    }

    async fn available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn spawn(&self, spec: JobSpec) -> Result<JobHandle> {
        let container_name = Self::container_name(&spec.id);

        // Pull the image first.
        info!(image = %spec.image, "Pulling image");
        let create_image_options = CreateImageOptions {
            from_image: spec.image.clone(),
            ..Default::default()
        };
        let mut pull_stream = self
            .docker
            .create_image(Some(create_image_options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Pull warning");
                }
            }
        }

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(env),
            working_dir: spec.working_dir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(Self::host_config(&spec.limits, &spec.mounts)),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        info!(container = %container_name, "Creating container");
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::Internal(format!("create container: {e}")))?;

        info!(container = %container_name, "Starting container");
        self.docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Internal(format!("start container: {e}")))?;

        Ok(JobHandle {
            id: spec.id,
            sandbox_id: container.id,
            backend: self.backend().to_string(),
        })
    }

    async fn logs(&self, handle: &JobHandle) -> Result<BoxStream<'static, LogLine>> {
        let container_name = Self::container_name(&handle.id);

        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: false,
            ..Default::default()
        };

        let stream = self.docker.logs(&container_name, Some(options));

        let mapped = stream.filter_map(|result| async move {
            match result {
                Ok(output) => {
                    let (stream, content) = match output {
                        LogOutput::StdErr { message } => (
                            LogStream::Stderr,
                            String::from_utf8_lossy(&message).to_string(),
                        ),
                        LogOutput::StdOut { message }
                        | LogOutput::Console { message }
                        | LogOutput::StdIn { message } => (
                            LogStream::Stdout,
                            String::from_utf8_lossy(&message).to_string(),
                        ),
                    };
                    Some(LogLine {
                        timestamp: Utc::now(),
                        stream,
                        line: content.trim_end().to_string(),
                    })
                }
                Err(e) => {
                    warn!(error = %e, "Log stream error");
                    None
                }
            }
        });

        Ok(Box::pin(mapped))
    }

    async fn wait(&self, handle: &JobHandle) -> Result<JobOutcome> {
        let container_name = Self::container_name(&handle.id);

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(&container_name, Some(options));
        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                // Nonzero exits surface as wait errors; the inspect below
                // has the authoritative exit code.
                debug!(error = %e, "Wait returned error");
            }
        }

        let inspect = self
            .docker
            .inspect_container(&container_name, None)
            .await
            .map_err(|e| Error::Internal(format!("inspect container: {e}")))?;
        let state = inspect
            .state
            .ok_or_else(|| Error::Internal("container has no state".to_string()))?;
        let exit_code = state.exit_code;

        let outcome = if exit_code == Some(0) {
            JobOutcome::Succeeded
        } else {
            JobOutcome::Failed {
                exit_code,
                message: state.error.unwrap_or_default(),
            }
        };

        // The container is done; reclaim it.
        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self
            .docker
            .remove_container(&container_name, Some(remove_options))
            .await
        {
            warn!(container = %container_name, error = %e, "Failed to remove container");
        }

        Ok(outcome)
    }

    async fn kill(&self, handle: &JobHandle) -> Result<()> {
        let container_name = Self::container_name(&handle.id);

        if let Err(e) = self.docker.stop_container(&container_name, None).await {
            warn!(container = %container_name, error = %e, "Failed to stop container");
        }

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(&container_name, Some(options))
            .await
            .map_err(|e| Error::Internal(format!("remove container: {e}")))?;

        Ok(())
    }
}


/// Integration tests that require a running Docker daemon.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use hippo_core::ResourceId;
    use std::collections::HashMap;

    fn spec(command: &str) -> JobSpec {
        JobSpec {
            id: ResourceId::new(),
            image: "alpine:latest".to_string(),
            command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                command.to_string(),
            ],
            env: HashMap::new(),
            working_dir: None,
            mounts: vec![],
            limits: ResourceLimits::default(),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn job_lifecycle() {
        let sandbox = DockerSandbox::connect().unwrap();
        assert!(sandbox.available().await);

        let handle = sandbox.spawn(spec("echo hello")).await.unwrap();
        let outcome = sandbox.wait(&handle).await.unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test]
    #[ignore]
    async fn failing_job_reports_exit_code() {
        let sandbox = DockerSandbox::connect().unwrap();

        let handle = sandbox.spawn(spec("exit 42")).await.unwrap();
        let outcome = sandbox.wait(&handle).await.unwrap();
        match outcome {
            JobOutcome::Failed { exit_code, .. } => assert_eq!(exit_code, Some(42)),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn kill_stops_a_running_job() {
        let sandbox = DockerSandbox::connect().unwrap();

        let handle = sandbox.spawn(spec("sleep 300")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        sandbox.kill(&handle).await.unwrap();
    }
}
