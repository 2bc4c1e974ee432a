//! Build steps and their sandbox job specifications.
//!
//! Every build runs the same three steps inside the builder image. The
//! image provides the `build-app` and `export-image` entrypoints; the
//! steps share a named workspace volume.

use std::collections::HashMap;
use std::time::Duration;

use hippo_core::ResourceId;
use hippo_core::build::{Build, SourceRef};
use hippo_core::sandbox::{JobSpec, Mount, ResourceLimits};

/// Directory the workspace volume is mounted on inside step containers.
const WORKSPACE_DIR: &str = "/workspace";
/// Checkout location within the workspace.
const SOURCE_DIR: &str = "/workspace/src";

/// Settings shared by every build the executor runs.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Builder image the steps run in.
    pub build_image: String,
    /// Repository prefix for produced artifact images.
    pub image_prefix: String,
    /// CPU/memory ceiling per sandbox job.
    pub limits: ResourceLimits,
    /// Transient-failure retries per step.
    pub step_retries: u32,
    /// How often a running step re-checks the cancellation flag.
    pub cancel_poll: Duration,
}

impl ExecutionSettings {
    pub fn new(build_image: impl Into<String>) -> Self {
        Self {
            build_image: build_image.into(),
            image_prefix: "hippo".to_string(),
            limits: ResourceLimits::default(),
            step_retries: 2,
            cancel_poll: Duration::from_secs(2),
        }
    }
}

/// The fixed step sequence of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fetch,
    Build,
    Export,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::Fetch, Step::Build, Step::Export];

    pub fn name(&self) -> &'static str {
        match self {
            Step::Fetch => "fetch",
            Step::Build => "build",
            Step::Export => "export",
        }
    }

    /// Sandbox job for this step of the given build. Each call mints a
    /// fresh job id so retried steps never collide on container names.
    pub fn spec(&self, build: &Build, settings: &ExecutionSettings) -> JobSpec {
        let script = match self {
            Step::Fetch => fetch_script(&build.source),
            Step::Build => format!("build-app {SOURCE_DIR}"),
            Step::Export => format!(
                "export-image {SOURCE_DIR} {}",
                artifact_image(build, settings)
            ),
        };

        let mut env = HashMap::new();
        env.insert("HIPPO_BUILD_ID".to_string(), build.id.to_string());
        env.insert("HIPPO_APP_ID".to_string(), build.app_id.to_string());

        JobSpec {
            id: ResourceId::new(),
            image: settings.build_image.clone(),
            command: vec!["/bin/sh".to_string(), "-c".to_string(), script],
            env,
            working_dir: Some(WORKSPACE_DIR.to_string()),
            mounts: vec![Mount {
                source: workspace_volume(build),
                target: WORKSPACE_DIR.to_string(),
                read_only: false,
            }],
            limits: settings.limits,
        }
    }
}

/// Named volume shared by a build's steps.
pub fn workspace_volume(build: &Build) -> String {
    format!("hippo-ws-{}", build.id.short())
}

/// Image reference the export step produces.
pub fn artifact_image(build: &Build, settings: &ExecutionSettings) -> String {
    format!(
        "{}/app-{}:{}",
        settings.image_prefix,
        build.app_id.short(),
        build.id.short()
    )
}

fn fetch_script(source: &SourceRef) -> String {
    match source {
        SourceRef::Git {
            url,
            reference,
            commit,
        } => {
            let branch_arg = reference
                .as_ref()
                .map(|r| format!("-b {r} "))
                .unwrap_or_default();
            let checkout = commit
                .as_ref()
                .map(|c| format!(" && git checkout {c}"))
                .unwrap_or_default();
            format!("rm -rf {SOURCE_DIR} && git clone --depth 1 {branch_arg}{url} {SOURCE_DIR} && cd {SOURCE_DIR}{checkout}")
        }
        SourceRef::Archive { url, checksum } => {
            let verify = checksum
                .as_ref()
                .map(|sum| format!(" && echo \"{sum}  /workspace/source.tar.gz\" | sha256sum -c -"))
                .unwrap_or_default();
            format!(
                "rm -rf {SOURCE_DIR} && wget -q -O /workspace/source.tar.gz {url}{verify} && mkdir -p {SOURCE_DIR} && tar -xzf /workspace/source.tar.gz -C {SOURCE_DIR} --strip-components=1"
            )
        }
    }
}
