//! Release trigger trait.
//!
//! The release collaborator promotes a successful build's artifact to serve
//! traffic. Hippo only notifies it; promotion itself is out of scope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::build::ArtifactRef;
use crate::{AppId, BuildId, Result};

/// Payload handed to the release collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub build_id: BuildId,
    pub app_id: AppId,
    pub artifact: ArtifactRef,
}

/// Collaborator notified once per succeeded build.
///
/// Implementations must tolerate duplicate invocations for the same build
/// id (the notifier already deduplicates, the wire can still replay).
#[async_trait]
pub trait ReleaseTrigger: Send + Sync {
    /// Name of this trigger, for logs.
    fn name(&self) -> &'static str;

    /// Ask the collaborator to cut a release for the build.
    async fn trigger(&self, request: &ReleaseRequest) -> Result<()>;
}
