//! Release trigger backends.
//!
//! The HTTP trigger posts a signed webhook to the release collaborator;
//! the log trigger stands in when no collaborator is configured. The
//! recording trigger backs tests across the workspace.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::info;
use url::Url;

use hippo_core::release::{ReleaseRequest, ReleaseTrigger};
use hippo_core::{BuildId, Error, Result};

/// Signature header carried by release webhooks.
pub const SIGNATURE_HEADER: &str = "X-Hippo-Signature";

/// Posts release webhooks to an HTTP endpoint, HMAC-signed when a secret
/// is configured.
pub struct HttpReleaseTrigger {
    client: reqwest::Client,
    endpoint: Url,
    secret: Option<String>,
}

impl HttpReleaseTrigger {
    pub fn new(endpoint: Url, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            secret,
        }
    }
}

#[async_trait]
impl ReleaseTrigger for HttpReleaseTrigger {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn trigger(&self, request: &ReleaseRequest) -> Result<()> {
        let body = serde_json::to_vec(request)
            .map_err(|e| Error::Internal(format!("encode release request: {e}")))?;

        let mut http = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            let signature = sign(secret.as_bytes(), &body);
            http = http.header(SIGNATURE_HEADER, format!("sha256={signature}"));
        }

        let response = http
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("release request: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "release endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Hex-encoded HMAC-SHA256 of the webhook body.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("HMAC can take any size key");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Logs releases instead of dispatching them. Used when no release
/// endpoint is configured.
#[derive(Default)]
pub struct LogReleaseTrigger;

impl LogReleaseTrigger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReleaseTrigger for LogReleaseTrigger {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn trigger(&self, request: &ReleaseRequest) -> Result<()> {
        info!(
            build_id = %request.build_id,
            app_id = %request.app_id,
            image = %request.artifact.image,
            "Release trigger (no endpoint configured)"
        );
        Ok(())
    }
}

/// Records trigger invocations; optionally fails the first N calls.
/// Backs idempotency and retry tests.
#[derive(Default)]
pub struct RecordingReleaseTrigger {
    calls: Mutex<Vec<ReleaseRequest>>,
    failures_remaining: AtomicU32,
}

impl RecordingReleaseTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A trigger whose first `n` invocations fail.
    pub fn failing(n: u32) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(n),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.lock_calls().len()
    }

    pub fn calls_for(&self, id: BuildId) -> usize {
        self.lock_calls()
            .iter()
            .filter(|r| r.build_id == id)
            .count()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<ReleaseRequest>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ReleaseTrigger for RecordingReleaseTrigger {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn trigger(&self, request: &ReleaseRequest) -> Result<()> {
        self.lock_calls().push(request.clone());
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Internal("scripted failure".to_string()));
        }
        Ok(())
    }
}
