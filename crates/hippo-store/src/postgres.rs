//! PostgreSQL store backends.
//!
//! Every lifecycle mutation is a single conditional UPDATE: the WHERE
//! clause carries the expectation (status, lease token) and a missing row
//! means the expectation no longer holds. Queue claiming uses
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never contend on the
//! same record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use hippo_core::app::App;
use hippo_core::build::{
    ArtifactRef, Build, BuildStatus, FailureReason, Lease, ReleaseState, SourceRef,
};
use hippo_core::log::{LogEntry, LogStream};
use hippo_core::{AppId, BuildId, Error, Result};

use crate::{AppStore, BuildStore};

fn db_err(e: sqlx::Error) -> Error {
    Error::Internal(format!("database: {e}"))
}

/// A build row as stored; flattened for sqlx, reassembled into the domain
/// type by `into_build`.
#[derive(Debug, sqlx::FromRow)]
struct BuildRow {
    id: Uuid,
    app_id: Uuid,
    source: serde_json::Value,
    status: String,
    failure: Option<serde_json::Value>,
    attempt: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    artifact: Option<serde_json::Value>,
    cancel_requested_at: Option<DateTime<Utc>>,
    archived: bool,
    lease_token: Option<Uuid>,
    lease_holder: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    release_state: String,
}

impl BuildRow {
    fn into_build(self) -> Result<Build> {
        let status = match self.status.as_str() {
            "queued" => BuildStatus::Queued,
            "running" => BuildStatus::Running,
            "succeeded" => BuildStatus::Succeeded,
            "failed" => {
                let value = self.failure.ok_or_else(|| {
                    Error::Internal(format!("build {}: failed without reason", self.id))
                })?;
                let reason: FailureReason = serde_json::from_value(value)
                    .map_err(|e| Error::Internal(format!("decode failure reason: {e}")))?;
                BuildStatus::Failed { reason }
            }
            "cancelled" => BuildStatus::Cancelled,
            other => {
                return Err(Error::Internal(format!(
                    "build {}: unknown status {other:?}",
                    self.id
                )));
            }
        };

        let source: SourceRef = serde_json::from_value(self.source)
            .map_err(|e| Error::Internal(format!("decode source: {e}")))?;
        let artifact: Option<ArtifactRef> = match self.artifact {
            Some(value) => Some(
                serde_json::from_value(value)
                    .map_err(|e| Error::Internal(format!("decode artifact: {e}")))?,
            ),
            None => None,
        };
        let lease = match (self.lease_token, self.lease_holder, self.lease_expires_at) {
            (Some(token), Some(holder), Some(expires_at)) => Some(Lease {
                token,
                holder,
                expires_at,
            }),
            _ => None,
        };
        let release_state = match self.release_state.as_str() {
            "unclaimed" => ReleaseState::Unclaimed,
            "claimed" => ReleaseState::Claimed,
            "dispatched" => ReleaseState::Dispatched,
            other => {
                return Err(Error::Internal(format!(
                    "build {}: unknown release state {other:?}",
                    self.id
                )));
            }
        };

        Ok(Build {
            id: BuildId::from_uuid(self.id),
            app_id: AppId::from_uuid(self.app_id),
            source,
            status,
            attempt: self.attempt as u32,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            artifact,
            cancel_requested_at: self.cancel_requested_at,
            archived: self.archived,
            lease,
            release_state,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    seq: i64,
    timestamp: DateTime<Utc>,
    step: String,
    stream: String,
    line: String,
}

impl LogRow {
    fn into_entry(self) -> Result<LogEntry> {
        Ok(LogEntry {
            seq: self.seq as u64,
            timestamp: self.timestamp,
            step: self.step,
            stream: self.stream.parse()?,
            line: self.line,
        })
    }
}

/// PostgreSQL implementation of the build store.
pub struct PgBuildStore {
    pool: PgPool,
}

impl PgBuildStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Classify a missed conditional UPDATE: unknown id is NotFound,
    /// anything else lost the compare-and-set race.
    async fn classify_miss(&self, id: BuildId, action: &str) -> Error {
        match self.get(id).await {
            Ok(current) => Error::Conflict(format!(
                "build {} is {}, cannot {}",
                id,
                current.status.name(),
                action
            )),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl BuildStore for PgBuildStore {
    async fn create(&self, app_id: AppId, source: SourceRef) -> Result<Build> {
        let value = serde_json::to_value(&source)
            .map_err(|e| Error::Internal(format!("encode source: {e}")))?;
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            INSERT INTO builds (id, app_id, source, status, attempt, created_at)
            VALUES ($1, $2, $3, 'queued', 0, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(app_id.as_uuid())
        .bind(value)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        row.into_build()
    }

    async fn get(&self, id: BuildId) -> Result<Build> {
        let row = sqlx::query_as::<_, BuildRow>("SELECT * FROM builds WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("build {id}")))?;
        row.into_build()
    }

    async fn list(&self, app_id: AppId) -> Result<Vec<Build>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT * FROM builds
            WHERE app_id = $1 AND archived = FALSE
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(app_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(BuildRow::into_build).collect()
    }

    async fn acquire(&self, holder: &str, ttl: Duration) -> Result<Option<Build>> {
        let expires_at = Utc::now() + ttl;
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds
            SET status = 'running', started_at = NOW(), attempt = attempt + 1,
                lease_token = $1, lease_holder = $2, lease_expires_at = $3
            WHERE id = (
                SELECT id FROM builds
                WHERE status = 'queued' AND archived = FALSE
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(holder)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(BuildRow::into_build).transpose()
    }

    async fn renew_lease(&self, id: BuildId, token: Uuid, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now() + ttl;
        let renewed: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE builds SET lease_expires_at = $3
            WHERE id = $1 AND lease_token = $2 AND status = 'running'
            RETURNING id
            "#,
        )
        .bind(id.as_uuid())
        .bind(token)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match renewed {
            Some(_) => Ok(()),
            None => Err(self.classify_miss(id, "renew lease").await),
        }
    }

    async fn complete(&self, id: BuildId, token: Uuid, artifact: ArtifactRef) -> Result<Build> {
        let value = serde_json::to_value(&artifact)
            .map_err(|e| Error::Internal(format!("encode artifact: {e}")))?;
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds
            SET status = 'succeeded', artifact = $3, finished_at = NOW(),
                lease_token = NULL, lease_holder = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_token = $2 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(token)
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => row.into_build(),
            None => Err(self.classify_miss(id, "complete").await),
        }
    }

    async fn fail(&self, id: BuildId, token: Uuid, reason: FailureReason) -> Result<Build> {
        let value = serde_json::to_value(&reason)
            .map_err(|e| Error::Internal(format!("encode failure reason: {e}")))?;
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds
            SET status = 'failed', failure = $3, finished_at = NOW(),
                lease_token = NULL, lease_holder = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_token = $2 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(token)
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => row.into_build(),
            None => Err(self.classify_miss(id, "fail").await),
        }
    }

    async fn finish_cancelled(&self, id: BuildId, token: Uuid) -> Result<Build> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds
            SET status = 'cancelled', finished_at = NOW(),
                lease_token = NULL, lease_holder = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_token = $2 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => row.into_build(),
            None => Err(self.classify_miss(id, "cancel").await),
        }
    }

    async fn requeue(&self, id: BuildId, token: Uuid) -> Result<Build> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds
            SET status = 'queued',
                lease_token = NULL, lease_holder = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_token = $2 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => row.into_build(),
            None => Err(self.classify_miss(id, "requeue").await),
        }
    }

    async fn request_cancel(&self, id: BuildId) -> Result<Build> {
        // Queued builds cancel directly.
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds SET status = 'cancelled', finished_at = NOW()
            WHERE id = $1 AND status = 'queued'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        if let Some(row) = row {
            return row.into_build();
        }

        // Running builds get the cooperative flag; idempotent.
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds
            SET cancel_requested_at = COALESCE(cancel_requested_at, NOW())
            WHERE id = $1 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => row.into_build(),
            None => Err(self.classify_miss(id, "cancel").await),
        }
    }

    async fn cancel_requested(&self, id: BuildId) -> Result<bool> {
        let requested: Option<bool> = sqlx::query_scalar(
            "SELECT cancel_requested_at IS NOT NULL FROM builds WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        requested.ok_or_else(|| Error::NotFound(format!("build {id}")))
    }

    async fn force_cancel(&self, id: BuildId) -> Result<Build> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds
            SET status = 'cancelled', finished_at = NOW(),
                lease_token = NULL, lease_holder = NULL, lease_expires_at = NULL
            WHERE id = $1 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => row.into_build(),
            None => Err(self.classify_miss(id, "force-cancel").await),
        }
    }

    async fn archive(&self, id: BuildId) -> Result<Build> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds SET archived = TRUE, status = 'cancelled', finished_at = NOW()
            WHERE id = $1 AND status = 'queued'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        if let Some(row) = row {
            return row.into_build();
        }

        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds
            SET archived = TRUE, cancel_requested_at = COALESCE(cancel_requested_at, NOW())
            WHERE id = $1 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        if let Some(row) = row {
            return row.into_build();
        }

        let row = sqlx::query_as::<_, BuildRow>(
            "UPDATE builds SET archived = TRUE WHERE id = $1 RETURNING *",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("build {id}")))?;
        row.into_build()
    }

    async fn append_log(
        &self,
        id: BuildId,
        step: &str,
        stream: LogStream,
        line: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO build_logs (build_id, seq, timestamp, step, stream, line)
            VALUES (
                $1,
                (SELECT COALESCE(MAX(seq), -1) + 1 FROM build_logs WHERE build_id = $1),
                NOW(), $2, $3, $4
            )
            "#,
        )
        .bind(id.as_uuid())
        .bind(step)
        .bind(stream.as_str())
        .bind(line)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(Error::NotFound(format!("build {id}")))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn logs(&self, id: BuildId, offset: u64, limit: u64) -> Result<Vec<LogEntry>> {
        // Distinguish an empty log from an unknown build.
        self.get(id).await?;
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT seq, timestamp, step, stream, line FROM build_logs
            WHERE build_id = $1
            ORDER BY seq ASC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(id.as_uuid())
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(LogRow::into_entry).collect()
    }

    async fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Build>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT * FROM builds
            WHERE status = 'running' AND lease_expires_at IS NOT NULL AND lease_expires_at <= $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(BuildRow::into_build).collect()
    }

    async fn cancel_overdue(&self, now: DateTime<Utc>, grace: Duration) -> Result<Vec<Build>> {
        let cutoff = now
            - chrono::Duration::from_std(grace)
                .map_err(|e| Error::Internal(format!("grace out of range: {e}")))?;
        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT * FROM builds
            WHERE status = 'running' AND cancel_requested_at IS NOT NULL
              AND cancel_requested_at <= $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(BuildRow::into_build).collect()
    }

    async fn release_pending(&self) -> Result<Vec<Build>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT * FROM builds
            WHERE status = 'succeeded' AND release_state = 'unclaimed' AND archived = FALSE
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(BuildRow::into_build).collect()
    }

    async fn claim_release(&self, id: BuildId) -> Result<bool> {
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE builds SET release_state = 'claimed'
            WHERE id = $1 AND status = 'succeeded' AND release_state = 'unclaimed'
            RETURNING id
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(claimed.is_some())
    }

    async fn mark_released(&self, id: BuildId) -> Result<()> {
        let marked: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE builds SET release_state = 'dispatched'
            WHERE id = $1 AND release_state = 'claimed'
            RETURNING id
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match marked {
            Some(_) => Ok(()),
            None => {
                self.get(id).await?;
                Err(Error::Conflict(format!("build {id}: release not claimed")))
            }
        }
    }

    async fn unclaim_release(&self, id: BuildId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE builds SET release_state = 'unclaimed'
            WHERE id = $1 AND release_state = 'claimed'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            self.get(id).await?;
        }
        Ok(())
    }
}

/// PostgreSQL implementation of the application store.
pub struct PgAppStore {
    pool: PgPool,
}

impl PgAppStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AppRow {
    id: Uuid,
    name: String,
    hostname: String,
    created_at: DateTime<Utc>,
}

impl From<AppRow> for App {
    fn from(row: AppRow) -> Self {
        App {
            id: AppId::from_uuid(row.id),
            name: row.name,
            hostname: row.hostname,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl AppStore for PgAppStore {
    async fn create(&self, name: &str, hostname: &str) -> Result<App> {
        let result = sqlx::query_as::<_, AppRow>(
            r#"
            INSERT INTO apps (id, name, hostname, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .bind(hostname)
        .fetch_one(&self.pool)
        .await;
        match result {
            Ok(row) => Ok(row.into()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(Error::Conflict(format!("app {name:?} already exists")))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get(&self, id: AppId) -> Result<App> {
        let row = sqlx::query_as::<_, AppRow>("SELECT * FROM apps WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("app {id}")))?;
        Ok(row.into())
    }

    async fn list(&self) -> Result<Vec<App>> {
        let rows = sqlx::query_as::<_, AppRow>("SELECT * FROM apps ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(App::from).collect())
    }
}
