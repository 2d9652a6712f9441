//! Coverage server HTTP routes.

pub mod api;

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::config::CoverageConfig;
use crate::error::CoverageError;
use crate::models::payload::IngestPayload;
use crate::models::project::{NewProject, Project};
use crate::services::pipeline::{BuildPipeline, JobReport};
use crate::services::project_service;
use crate::store::pg::PgStore;

/// Shared state for coverage route handlers.
#[derive(Clone)]
pub struct CoverageRouterState {
    pub pipeline: Arc<BuildPipeline<PgStore, PgStore>>,
    pub store: PgStore,
    pub config: CoverageConfig,
}

/// Build the coverage server's Axum router (nested at `/coverage`).
pub fn coverage_router(state: CoverageRouterState) -> Router {
    Router::new()
        // Project API
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/{project_id}/jobs", post(submit_job))
        .route(
            "/api/projects/{project_id}/builds",
            get(list_builds).post(open_build),
        )
        .route(
            "/api/projects/{project_id}/builds/{build_id}/done",
            post(close_build),
        )
        // Build API
        .route("/api/builds/{build_id}", get(get_build).patch(patch_build))
        .route("/api/builds/{build_id}/coverage", post(recompute_coverage))
        .with_state(state)
}

impl IntoResponse for CoverageError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "internal error".to_string()
        } else {
            tracing::debug!(error = %self, "Request rejected");
            self.to_string()
        };
        (status, Json(api::ErrorJson { error: message })).into_response()
    }
}

// ── Project API ──

async fn list_projects(
    State(state): State<CoverageRouterState>,
) -> Result<Json<Vec<Project>>, CoverageError> {
    let mut conn = state.store.conn().await?;
    project_service::list_projects(&mut conn).await.map(Json)
}

async fn create_project(
    State(state): State<CoverageRouterState>,
    Json(req): Json<NewProject>,
) -> Result<(StatusCode, Json<Project>), CoverageError> {
    let mut conn = state.store.conn().await?;
    project_service::create_project(&mut conn, req)
        .await
        .map(|p| (StatusCode::CREATED, Json(p)))
}

// ── Build API ──

async fn submit_job(
    State(state): State<CoverageRouterState>,
    Path(project_id): Path<i64>,
    Json(payload): Json<IngestPayload>,
) -> Result<(StatusCode, Json<JobReport>), CoverageError> {
    state
        .pipeline
        .submit_job(project_id, payload)
        .await
        .map(|r| (StatusCode::CREATED, Json(r)))
}

/// Find or create a build without recording a job.
async fn open_build(
    State(state): State<CoverageRouterState>,
    Path(project_id): Path<i64>,
    Json(payload): Json<IngestPayload>,
) -> Result<Json<api::BuildJson>, CoverageError> {
    let build = state.pipeline.get_or_create(project_id, payload).await?;
    Ok(Json(build.into()))
}

async fn close_build(
    State(state): State<CoverageRouterState>,
    Path((project_id, build_id)): Path<(i64, i64)>,
) -> Result<Json<api::BuildJson>, CoverageError> {
    let build = state.pipeline.close_build(project_id, build_id).await?;
    Ok(Json(build.into()))
}

async fn list_builds(
    State(state): State<CoverageRouterState>,
    Path(project_id): Path<i64>,
    Query(query): Query<api::ListBuildsQuery>,
) -> Result<Json<Vec<api::BuildJson>>, CoverageError> {
    let limit = state.config.page_size(query.limit);
    let branch = query.branch.map(|b| b.trim().to_string());
    let builds = state
        .pipeline
        .list_builds(project_id, branch, limit)
        .await?;
    Ok(Json(builds.into_iter().map(api::BuildJson::from).collect()))
}

async fn get_build(
    State(state): State<CoverageRouterState>,
    Path(build_id): Path<i64>,
) -> Result<Json<api::BuildJson>, CoverageError> {
    let build = state.pipeline.find_build(build_id).await?;
    Ok(Json(build.into()))
}

async fn patch_build(
    State(state): State<CoverageRouterState>,
    Path(build_id): Path<i64>,
    Json(patch): Json<api::BuildPatch>,
) -> Result<Json<api::BuildJson>, CoverageError> {
    let build = state
        .pipeline
        .update_build(build_id, patch.into_changeset()?)
        .await?;
    Ok(Json(build.into()))
}

async fn recompute_coverage(
    State(state): State<CoverageRouterState>,
    Path(build_id): Path<i64>,
) -> Result<Json<api::BuildJson>, CoverageError> {
    let build = state.pipeline.update_coverage(build_id).await?;
    Ok(Json(build.into()))
}
