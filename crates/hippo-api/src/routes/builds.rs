//! Build management endpoints.
//!
//! Path shapes follow the platform's routing convention:
//! `new/`, `{id}/`, `{id}/edit/`, `{id}/delete/`.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use hippo_core::build::{ArtifactRef, Build, BuildStatus, SourceRef};
use hippo_core::log::LogEntry;
use hippo_core::{AppId, BuildId};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_builds))
        .route("/new/", post(create_build))
        .route("/{id}/", get(get_build))
        .route("/{id}/edit/", post(edit_build))
        .route("/{id}/delete/", post(delete_build))
}

#[derive(Debug, Serialize)]
struct BuildSummary {
    id: String,
    app_id: String,
    source: SourceRef,
    status: BuildStatus,
    attempt: u32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    artifact: Option<ArtifactRef>,
    cancel_requested: bool,
    archived: bool,
}

impl From<Build> for BuildSummary {
    fn from(build: Build) -> Self {
        Self {
            id: build.id.to_string(),
            app_id: build.app_id.to_string(),
            source: build.source,
            status: build.status,
            attempt: build.attempt,
            created_at: build.created_at,
            started_at: build.started_at,
            finished_at: build.finished_at,
            artifact: build.artifact,
            cancel_requested: build.cancel_requested_at.is_some(),
            archived: build.archived,
        }
    }
}

#[derive(Debug, Serialize)]
struct BuildDetail {
    #[serde(flatten)]
    build: BuildSummary,
    log: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
struct ListBuildsQuery {
    app: Uuid,
}

async fn list_builds(
    State(state): State<AppState>,
    Query(query): Query<ListBuildsQuery>,
) -> Result<Json<Vec<BuildSummary>>, ApiError> {
    let builds = state.builds.list(AppId::from_uuid(query.app)).await?;
    Ok(Json(builds.into_iter().map(BuildSummary::from).collect()))
}

#[derive(Debug, Deserialize)]
struct CreateBuildRequest {
    app_id: Uuid,
    source: SourceRef,
}

async fn create_build(
    State(state): State<AppState>,
    Json(req): Json<CreateBuildRequest>,
) -> Result<Json<BuildSummary>, ApiError> {
    let app_id = AppId::from_uuid(req.app_id);
    // Builds only reference applications that exist.
    state.apps.get(app_id).await?;
    req.source.validate()?;

    let build = state.builds.create(app_id, req.source).await?;
    tracing::info!(build_id = %build.id, app_id = %app_id, "Build submitted");
    Ok(Json(build.into()))
}

#[derive(Debug, Deserialize)]
struct GetBuildQuery {
    log_offset: Option<u64>,
    log_limit: Option<u64>,
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<GetBuildQuery>,
) -> Result<Json<BuildDetail>, ApiError> {
    let id = BuildId::from_uuid(id);
    let build = state.builds.get(id).await?;

    let offset = query.log_offset.unwrap_or(0);
    let limit = query.log_limit.unwrap_or(500).min(1000);
    let log = state.builds.logs(id, offset, limit).await?;

    Ok(Json(BuildDetail {
        build: build.into(),
        log,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum EditAction {
    Cancel,
}

#[derive(Debug, Deserialize)]
struct EditBuildRequest {
    action: EditAction,
}

async fn edit_build(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EditBuildRequest>,
) -> Result<Json<BuildSummary>, ApiError> {
    let id = BuildId::from_uuid(id);
    let build = match req.action {
        EditAction::Cancel => state.builds.request_cancel(id).await?,
    };
    tracing::info!(build_id = %id, status = build.status.name(), "Cancellation requested");
    Ok(Json(build.into()))
}

async fn delete_build(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BuildSummary>, ApiError> {
    let id = BuildId::from_uuid(id);
    // Delete means archive: cancel if still active, retain for audit.
    let build = state.builds.archive(id).await?;
    tracing::info!(build_id = %id, "Build archived");
    Ok(Json(build.into()))
}
