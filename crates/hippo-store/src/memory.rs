//! In-memory store backends.
//!
//! An arena of build records keyed by id behind a single lock; every
//! mutation validates its expectation (status, lease token) inside the
//! critical section, which makes each method an atomic compare-and-set.
//! Default backend for tests and single-node development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use uuid::Uuid;

use hippo_core::app::App;
use hippo_core::build::{
    ArtifactRef, Build, BuildStatus, FailureReason, Lease, ReleaseState, SourceRef,
};
use hippo_core::log::{LogEntry, LogStream};
use hippo_core::{AppId, BuildId, Error, Result};

use crate::{AppStore, BuildStore};

#[derive(Default)]
struct Inner {
    builds: HashMap<BuildId, Build>,
    logs: HashMap<BuildId, Vec<LogEntry>>,
}

/// Build store backed by process memory.
#[derive(Default)]
pub struct MemoryBuildStore {
    inner: RwLock<Inner>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(id: BuildId) -> Error {
    Error::NotFound(format!("build {id}"))
}

fn conflict(build: &Build, wanted: &str) -> Error {
    Error::Conflict(format!(
        "build {} is {}, cannot {}",
        build.id,
        build.status.name(),
        wanted
    ))
}

/// Lease token must match for guarded commits from an executor.
fn check_token(build: &Build, token: Uuid) -> Result<()> {
    match &build.lease {
        Some(lease) if lease.token == token => Ok(()),
        _ => Err(Error::Conflict(format!(
            "build {}: lease token mismatch",
            build.id
        ))),
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn create(&self, app_id: AppId, source: SourceRef) -> Result<Build> {
        let build = Build {
            id: BuildId::new(),
            app_id,
            source,
            status: BuildStatus::Queued,
            attempt: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            artifact: None,
            cancel_requested_at: None,
            archived: false,
            lease: None,
            release_state: ReleaseState::Unclaimed,
        };
        let mut inner = self.write();
        inner.logs.insert(build.id, Vec::new());
        inner.builds.insert(build.id, build.clone());
        Ok(build)
    }

    async fn get(&self, id: BuildId) -> Result<Build> {
        self.read()
            .builds
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn list(&self, app_id: AppId) -> Result<Vec<Build>> {
        let inner = self.read();
        let mut builds: Vec<Build> = inner
            .builds
            .values()
            .filter(|b| b.app_id == app_id && !b.archived)
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(builds)
    }

    async fn acquire(&self, holder: &str, ttl: Duration) -> Result<Option<Build>> {
        let mut inner = self.write();
        let next = inner
            .builds
            .values()
            .filter(|b| b.status == BuildStatus::Queued && !b.archived)
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|b| b.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        build.status = BuildStatus::Running;
        build.started_at = Some(Utc::now());
        build.attempt += 1;
        build.lease = Some(Lease {
            token: Uuid::new_v4(),
            holder: holder.to_string(),
            expires_at: Utc::now() + ttl,
        });
        Ok(Some(build.clone()))
    }

    async fn renew_lease(&self, id: BuildId, token: Uuid, ttl: Duration) -> Result<()> {
        let mut inner = self.write();
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        if build.status != BuildStatus::Running {
            return Err(conflict(build, "renew lease"));
        }
        check_token(build, token)?;
        if let Some(lease) = build.lease.as_mut() {
            lease.expires_at = Utc::now() + ttl;
        }
        Ok(())
    }

    async fn complete(&self, id: BuildId, token: Uuid, artifact: ArtifactRef) -> Result<Build> {
        let mut inner = self.write();
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        if build.status != BuildStatus::Running {
            return Err(conflict(build, "complete"));
        }
        check_token(build, token)?;
        build.status = BuildStatus::Succeeded;
        build.artifact = Some(artifact);
        build.finished_at = Some(Utc::now());
        build.lease = None;
        Ok(build.clone())
    }

    async fn fail(&self, id: BuildId, token: Uuid, reason: FailureReason) -> Result<Build> {
        let mut inner = self.write();
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        if build.status != BuildStatus::Running {
            return Err(conflict(build, "fail"));
        }
        check_token(build, token)?;
        build.status = BuildStatus::Failed { reason };
        build.finished_at = Some(Utc::now());
        build.lease = None;
        Ok(build.clone())
    }

    async fn finish_cancelled(&self, id: BuildId, token: Uuid) -> Result<Build> {
        let mut inner = self.write();
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        if build.status != BuildStatus::Running {
            return Err(conflict(build, "cancel"));
        }
        check_token(build, token)?;
        build.status = BuildStatus::Cancelled;
        build.finished_at = Some(Utc::now());
        build.lease = None;
        Ok(build.clone())
    }

    async fn requeue(&self, id: BuildId, token: Uuid) -> Result<Build> {
        let mut inner = self.write();
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        if build.status != BuildStatus::Running {
            return Err(conflict(build, "requeue"));
        }
        check_token(build, token)?;
        build.status = BuildStatus::Queued;
        build.lease = None;
        Ok(build.clone())
    }

    async fn request_cancel(&self, id: BuildId) -> Result<Build> {
        let mut inner = self.write();
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        match build.status {
            BuildStatus::Queued => {
                build.status = BuildStatus::Cancelled;
                build.finished_at = Some(Utc::now());
                Ok(build.clone())
            }
            BuildStatus::Running => {
                if build.cancel_requested_at.is_none() {
                    build.cancel_requested_at = Some(Utc::now());
                }
                Ok(build.clone())
            }
            _ => Err(conflict(build, "cancel")),
        }
    }

    async fn cancel_requested(&self, id: BuildId) -> Result<bool> {
        let inner = self.read();
        let build = inner.builds.get(&id).ok_or_else(|| not_found(id))?;
        Ok(build.cancel_requested_at.is_some())
    }

    async fn force_cancel(&self, id: BuildId) -> Result<Build> {
        let mut inner = self.write();
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        if build.status != BuildStatus::Running {
            return Err(conflict(build, "force-cancel"));
        }
        build.status = BuildStatus::Cancelled;
        build.finished_at = Some(Utc::now());
        build.lease = None;
        Ok(build.clone())
    }

    async fn archive(&self, id: BuildId) -> Result<Build> {
        let mut inner = self.write();
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        match build.status {
            BuildStatus::Queued => {
                build.status = BuildStatus::Cancelled;
                build.finished_at = Some(Utc::now());
            }
            BuildStatus::Running => {
                if build.cancel_requested_at.is_none() {
                    build.cancel_requested_at = Some(Utc::now());
                }
            }
            _ => {}
        }
        build.archived = true;
        Ok(build.clone())
    }

    async fn append_log(
        &self,
        id: BuildId,
        step: &str,
        stream: LogStream,
        line: &str,
    ) -> Result<()> {
        let mut inner = self.write();
        if !inner.builds.contains_key(&id) {
            return Err(not_found(id));
        }
        let log = inner.logs.entry(id).or_default();
        let seq = log.len() as u64;
        log.push(LogEntry {
            seq,
            timestamp: Utc::now(),
            step: step.to_string(),
            stream,
            line: line.to_string(),
        });
        Ok(())
    }

    async fn logs(&self, id: BuildId, offset: u64, limit: u64) -> Result<Vec<LogEntry>> {
        let inner = self.read();
        if !inner.builds.contains_key(&id) {
            return Err(not_found(id));
        }
        let log = inner.logs.get(&id).map(Vec::as_slice).unwrap_or_default();
        Ok(log
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Build>> {
        let inner = self.read();
        Ok(inner
            .builds
            .values()
            .filter(|b| {
                b.status == BuildStatus::Running
                    && b.lease.as_ref().is_some_and(|l| l.expires_at <= now)
            })
            .cloned()
            .collect())
    }

    async fn cancel_overdue(&self, now: DateTime<Utc>, grace: Duration) -> Result<Vec<Build>> {
        let cutoff = now
            - chrono::Duration::from_std(grace)
                .map_err(|e| Error::Internal(format!("grace out of range: {e}")))?;
        let inner = self.read();
        Ok(inner
            .builds
            .values()
            .filter(|b| {
                b.status == BuildStatus::Running
                    && b.cancel_requested_at.is_some_and(|at| at <= cutoff)
            })
            .cloned()
            .collect())
    }

    async fn release_pending(&self) -> Result<Vec<Build>> {
        let inner = self.read();
        Ok(inner
            .builds
            .values()
            .filter(|b| {
                b.status == BuildStatus::Succeeded
                    && b.release_state == ReleaseState::Unclaimed
                    && !b.archived
            })
            .cloned()
            .collect())
    }

    async fn claim_release(&self, id: BuildId) -> Result<bool> {
        let mut inner = self.write();
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        if build.status != BuildStatus::Succeeded
            || build.release_state != ReleaseState::Unclaimed
        {
            return Ok(false);
        }
        build.release_state = ReleaseState::Claimed;
        Ok(true)
    }

    async fn mark_released(&self, id: BuildId) -> Result<()> {
        let mut inner = self.write();
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        if build.release_state != ReleaseState::Claimed {
            return Err(Error::Conflict(format!(
                "build {id}: release not claimed"
            )));
        }
        build.release_state = ReleaseState::Dispatched;
        Ok(())
    }

    async fn unclaim_release(&self, id: BuildId) -> Result<()> {
        let mut inner = self.write();
        let build = inner.builds.get_mut(&id).ok_or_else(|| not_found(id))?;
        if build.release_state == ReleaseState::Claimed {
            build.release_state = ReleaseState::Unclaimed;
        }
        Ok(())
    }
}

/// Application store backed by process memory.
#[derive(Default)]
pub struct MemoryAppStore {
    apps: RwLock<HashMap<AppId, App>>,
}

impl MemoryAppStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppStore for MemoryAppStore {
    async fn create(&self, name: &str, hostname: &str) -> Result<App> {
        let mut apps = self.apps.write().unwrap_or_else(PoisonError::into_inner);
        if apps.values().any(|a| a.name == name) {
            return Err(Error::Conflict(format!("app {name:?} already exists")));
        }
        let app = App {
            id: AppId::new(),
            name: name.to_string(),
            hostname: hostname.to_string(),
            created_at: Utc::now(),
        };
        apps.insert(app.id, app.clone());
        Ok(app)
    }

    async fn get(&self, id: AppId) -> Result<App> {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("app {id}")))
    }

    async fn list(&self) -> Result<Vec<App>> {
        let mut apps: Vec<App> = self
            .apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn source() -> SourceRef {
        SourceRef::Git {
            url: "https://git.example.com/org/app.git".to_string(),
            reference: Some("main".to_string()),
            commit: None,
        }
    }

    fn artifact() -> ArtifactRef {
        ArtifactRef {
            image: "hippo/app:0192f3ab".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_then_get_is_queued_and_empty() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();

        let fetched = store.get(build.id).await.unwrap();
        assert_eq!(fetched.status, BuildStatus::Queued);
        assert!(fetched.artifact.is_none());
        assert_eq!(fetched.attempt, 0);
        assert!(store.logs(build.id, 0, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = MemoryBuildStore::new();
        assert!(matches!(
            store.get(BuildId::new()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn acquire_claims_oldest_queued() {
        let store = MemoryBuildStore::new();
        let app = AppId::new();
        let first = store.create(app, source()).await.unwrap();
        let _second = store.create(app, source()).await.unwrap();

        let claimed = store
            .acquire("worker-0", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, BuildStatus::Running);
        assert_eq!(claimed.attempt, 1);
        assert!(claimed.started_at.is_some());
        assert_eq!(claimed.lease.as_ref().unwrap().holder, "worker-0");
    }

    #[tokio::test]
    async fn concurrent_acquire_never_hands_out_same_build() {
        let store = Arc::new(MemoryBuildStore::new());
        let app = AppId::new();
        for _ in 0..4 {
            store.create(app, source()).await.unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .acquire(&format!("worker-{i}"), Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(build) = handle.await.unwrap() {
                claimed.push(build.id);
            }
        }
        claimed.sort();
        claimed.dedup();
        assert_eq!(claimed.len(), 4, "each build claimed exactly once");
    }

    #[tokio::test]
    async fn complete_sets_status_and_artifact_together() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();
        let claimed = store
            .acquire("worker-0", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let token = claimed.lease.unwrap().token;

        let done = store.complete(build.id, token, artifact()).await.unwrap();
        assert_eq!(done.status, BuildStatus::Succeeded);
        assert!(done.artifact.is_some());
        assert!(done.finished_at.is_some());
        assert!(done.lease.is_none());

        let fetched = store.get(build.id).await.unwrap();
        assert_eq!(
            fetched.status == BuildStatus::Succeeded,
            fetched.artifact.is_some(),
            "succeeded and artifact are visible together"
        );
    }

    #[tokio::test]
    async fn stale_token_cannot_commit() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();
        store
            .acquire("worker-0", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let stale = Uuid::new_v4();
        assert!(matches!(
            store.complete(build.id, stale, artifact()).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            store
                .fail(
                    build.id,
                    stale,
                    FailureReason::Timeout {
                        message: "x".to_string()
                    }
                )
                .await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn terminal_builds_reject_further_transitions() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();
        let claimed = store
            .acquire("worker-0", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let token = claimed.lease.unwrap().token;
        store.complete(build.id, token, artifact()).await.unwrap();

        assert!(matches!(
            store.complete(build.id, token, artifact()).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            store.request_cancel(build.id).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            store.requeue(build.id, token).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn cancel_queued_is_direct() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();

        let cancelled = store.request_cancel(build.id).await.unwrap();
        assert_eq!(cancelled.status, BuildStatus::Cancelled);
        assert!(cancelled.finished_at.is_some());
    }

    #[tokio::test]
    async fn cancel_running_sets_flag_only() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();
        store
            .acquire("worker-0", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let flagged = store.request_cancel(build.id).await.unwrap();
        assert_eq!(flagged.status, BuildStatus::Running);
        assert!(flagged.cancel_requested_at.is_some());
        assert!(store.cancel_requested(build.id).await.unwrap());

        // Idempotent: the original request timestamp is kept.
        let again = store.request_cancel(build.id).await.unwrap();
        assert_eq!(again.cancel_requested_at, flagged.cancel_requested_at);
    }

    #[tokio::test]
    async fn requeue_returns_build_to_queue() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();
        let claimed = store
            .acquire("worker-0", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let token = claimed.lease.unwrap().token;

        let requeued = store.requeue(build.id, token).await.unwrap();
        assert_eq!(requeued.status, BuildStatus::Queued);
        assert!(requeued.lease.is_none());
        assert_eq!(requeued.attempt, 1);

        // A second acquire picks it up again with a fresh lease.
        let again = store
            .acquire("worker-1", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, build.id);
        assert_eq!(again.attempt, 2);
        assert_ne!(again.lease.unwrap().token, token);
    }

    #[tokio::test]
    async fn expired_leases_are_visible_to_the_reaper() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();
        store
            .acquire("worker-0", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        assert!(store.expired_leases(Utc::now()).await.unwrap().is_empty());
        let later = Utc::now() + chrono::Duration::seconds(5);
        let expired = store.expired_leases(later).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, build.id);
    }

    #[tokio::test]
    async fn renew_extends_the_lease() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();
        let claimed = store
            .acquire("worker-0", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        let token = claimed.lease.unwrap().token;

        store
            .renew_lease(build.id, token, Duration::from_secs(300))
            .await
            .unwrap();
        let later = Utc::now() + chrono::Duration::seconds(5);
        assert!(store.expired_leases(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overdue_cancellations_are_visible_to_the_enforcer() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();
        store
            .acquire("worker-0", Duration::from_secs(600))
            .await
            .unwrap()
            .unwrap();
        store.request_cancel(build.id).await.unwrap();

        let grace = Duration::from_secs(30);
        assert!(
            store
                .cancel_overdue(Utc::now(), grace)
                .await
                .unwrap()
                .is_empty()
        );
        let later = Utc::now() + chrono::Duration::seconds(60);
        let overdue = store.cancel_overdue(later, grace).await.unwrap();
        assert_eq!(overdue.len(), 1);

        let forced = store.force_cancel(build.id).await.unwrap();
        assert_eq!(forced.status, BuildStatus::Cancelled);
        assert!(forced.lease.is_none());
    }

    #[tokio::test]
    async fn archive_retains_record_and_cancels_queued() {
        let store = MemoryBuildStore::new();
        let app = AppId::new();
        let build = store.create(app, source()).await.unwrap();

        let archived = store.archive(build.id).await.unwrap();
        assert!(archived.archived);
        assert_eq!(archived.status, BuildStatus::Cancelled);

        // Excluded from listings, still readable by id.
        assert!(store.list(app).await.unwrap().is_empty());
        assert!(store.get(build.id).await.is_ok());

        // Idempotent.
        let again = store.archive(build.id).await.unwrap();
        assert!(again.archived);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = MemoryBuildStore::new();
        let app = AppId::new();
        let b1 = store.create(app, source()).await.unwrap();
        let b2 = store.create(app, source()).await.unwrap();
        let b3 = store.create(app, source()).await.unwrap();

        let listed = store.list(app).await.unwrap();
        let ids: Vec<BuildId> = listed.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![b3.id, b2.id, b1.id]);
    }

    #[tokio::test]
    async fn log_is_append_only_and_ordered() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();

        store
            .append_log(build.id, "fetch", LogStream::System, "cloning")
            .await
            .unwrap();
        store
            .append_log(build.id, "build", LogStream::Stdout, "compiling")
            .await
            .unwrap();
        store
            .append_log(build.id, "build", LogStream::Stderr, "warning: unused")
            .await
            .unwrap();

        let all = store.logs(build.id, 0, 100).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(
            all.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(all[1].step, "build");

        let page = store.logs(build.id, 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].line, "compiling");
    }

    #[tokio::test]
    async fn release_claim_is_exclusive() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();
        let claimed = store
            .acquire("worker-0", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let token = claimed.lease.unwrap().token;
        store.complete(build.id, token, artifact()).await.unwrap();

        assert_eq!(store.release_pending().await.unwrap().len(), 1);
        assert!(store.claim_release(build.id).await.unwrap());
        assert!(!store.claim_release(build.id).await.unwrap());
        assert!(store.release_pending().await.unwrap().is_empty());

        // A failed dispatch puts the claim back.
        store.unclaim_release(build.id).await.unwrap();
        assert!(store.claim_release(build.id).await.unwrap());

        store.mark_released(build.id).await.unwrap();
        assert!(!store.claim_release(build.id).await.unwrap());
    }

    #[tokio::test]
    async fn release_claim_requires_success() {
        let store = MemoryBuildStore::new();
        let build = store.create(AppId::new(), source()).await.unwrap();
        assert!(!store.claim_release(build.id).await.unwrap());
    }

    #[tokio::test]
    async fn app_store_enforces_unique_names() {
        let store = MemoryAppStore::new();
        let app = store.create("web", "web.hippo.test").await.unwrap();
        assert_eq!(app.name, "web");

        assert!(matches!(
            store.create("web", "other.hippo.test").await,
            Err(Error::Conflict(_))
        ));

        store.create("api", "api.hippo.test").await.unwrap();
        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["api", "web"]);
    }
}
