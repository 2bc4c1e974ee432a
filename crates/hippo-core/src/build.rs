//! Build records and lifecycle transition rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::{AppId, BuildId, Error, Result};

/// One attempt to produce a deployable artifact from an application's source.
///
/// Builds are flat records linked to their application by id. All mutation
/// goes through the record store, which enforces the transition rules below
/// with compare-and-set updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    /// Unique identifier.
    pub id: BuildId,
    /// Owning application.
    pub app_id: AppId,
    /// Where the source comes from.
    pub source: SourceRef,
    /// Current lifecycle status.
    pub status: BuildStatus,
    /// Number of lease acquisitions so far.
    pub attempt: u32,
    /// When the build was submitted.
    pub created_at: DateTime<Utc>,
    /// When an executor first picked the build up.
    pub started_at: Option<DateTime<Utc>>,
    /// When the build reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Artifact reference; set atomically with the Succeeded transition.
    pub artifact: Option<ArtifactRef>,
    /// Set when a user requested cancellation of a running build.
    pub cancel_requested_at: Option<DateTime<Utc>>,
    /// Soft-deleted; the record is retained for audit.
    pub archived: bool,
    /// Exclusive executor claim, present only while running.
    pub lease: Option<Lease>,
    /// Release-trigger dispatch state for succeeded builds.
    pub release_state: ReleaseState,
}

impl Build {
    /// True while the build still occupies the pipeline (queued or running).
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Pointer to the source a build consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRef {
    /// A git repository at an optional ref/commit.
    Git {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit: Option<String>,
    },
    /// A source archive, optionally checksummed.
    Archive {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },
}

impl SourceRef {
    pub fn url(&self) -> &str {
        match self {
            SourceRef::Git { url, .. } | SourceRef::Archive { url, .. } => url,
        }
    }

    /// Reject refs whose URL does not parse; everything downstream assumes
    /// a well-formed URL.
    pub fn validate(&self) -> Result<()> {
        Url::parse(self.url())
            .map_err(|e| Error::InvalidInput(format!("source url {:?}: {}", self.url(), e)))?;
        Ok(())
    }
}

/// Reference to a built artifact (a container image).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Image reference, e.g. "hippo/myapp:0192f3ab".
    pub image: String,
    /// When the artifact was produced.
    pub created_at: DateTime<Utc>,
}

/// A time-bounded exclusive claim by one executor on one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Fencing token; every status commit from the holder carries it.
    pub token: Uuid,
    /// Worker identity, for logs and diagnostics.
    pub holder: String,
    /// After this instant the lease may be reaped.
    pub expires_at: DateTime<Utc>,
}

/// Lifecycle status of a build.
///
/// ```text
/// queued  -> running | cancelled | failed
/// running -> succeeded | failed | cancelled | queued (lease lost)
/// ```
/// Terminal statuses never transition again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BuildStatus {
    /// Waiting for an executor.
    Queued,
    /// An executor holds the lease and is processing the build.
    Running,
    /// Completed; the artifact reference is set.
    Succeeded,
    /// Terminal failure with a recorded reason.
    Failed { reason: FailureReason },
    /// Cancelled by the user or forced by the controller.
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded | BuildStatus::Failed { .. } | BuildStatus::Cancelled
        )
    }

    /// Whether moving to `next` respects the one-directional state machine.
    pub fn can_transition(&self, next: &BuildStatus) -> bool {
        match (self, next) {
            (BuildStatus::Queued, BuildStatus::Running)
            | (BuildStatus::Queued, BuildStatus::Cancelled)
            | (BuildStatus::Queued, BuildStatus::Failed { .. })
            | (BuildStatus::Running, BuildStatus::Succeeded)
            | (BuildStatus::Running, BuildStatus::Failed { .. })
            | (BuildStatus::Running, BuildStatus::Cancelled)
            | (BuildStatus::Running, BuildStatus::Queued) => true,
            _ => false,
        }
    }

    /// Stable name for storage and display.
    pub fn name(&self) -> &'static str {
        match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Running => "running",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed { .. } => "failed",
            BuildStatus::Cancelled => "cancelled",
        }
    }
}

/// Why a build failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// A build step exited nonzero or could not run.
    Execution { step: String, cause: String },
    /// Lease or wall-clock budget expired.
    Timeout { message: String },
}

/// Dispatch state of the release trigger for a succeeded build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    /// Not yet picked up by the notifier.
    #[default]
    Unclaimed,
    /// A notifier holds the dispatch claim.
    Claimed,
    /// The release collaborator acknowledged the trigger.
    Dispatched,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> BuildStatus {
        BuildStatus::Failed {
            reason: FailureReason::Execution {
                step: "build".to_string(),
                cause: "nonzero exit".to_string(),
            },
        }
    }

    #[test]
    fn queued_transitions() {
        let q = BuildStatus::Queued;
        assert!(q.can_transition(&BuildStatus::Running));
        assert!(q.can_transition(&BuildStatus::Cancelled));
        assert!(q.can_transition(&failed()));
        assert!(!q.can_transition(&BuildStatus::Succeeded));
        assert!(!q.can_transition(&BuildStatus::Queued));
    }

    #[test]
    fn running_transitions() {
        let r = BuildStatus::Running;
        assert!(r.can_transition(&BuildStatus::Succeeded));
        assert!(r.can_transition(&failed()));
        assert!(r.can_transition(&BuildStatus::Cancelled));
        // Lease loss sends a running build back to the queue.
        assert!(r.can_transition(&BuildStatus::Queued));
        assert!(!r.can_transition(&BuildStatus::Running));
    }

    #[test]
    fn terminal_states_never_regress() {
        for terminal in [BuildStatus::Succeeded, failed(), BuildStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for next in [
                BuildStatus::Queued,
                BuildStatus::Running,
                BuildStatus::Succeeded,
                failed(),
                BuildStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition(&next));
            }
        }
    }

    #[test]
    fn source_ref_validation() {
        let ok = SourceRef::Git {
            url: "https://git.example.com/org/app.git".to_string(),
            reference: Some("main".to_string()),
            commit: None,
        };
        assert!(ok.validate().is_ok());

        let bad = SourceRef::Archive {
            url: "not a url".to_string(),
            checksum: None,
        };
        assert!(matches!(bad.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn status_serializes_with_reason() {
        let status = failed();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"]["kind"], "execution");
        assert_eq!(json["reason"]["step"], "build");
    }
}
