//! Handlers for the `/jobs` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use validator::Validate;
use vidflow_core::error::CoreError;
use vidflow_core::types::JobId;
use vidflow_db::models::job::{CreateJob, Job, JobListQuery, RequestAction};
use vidflow_db::repositories::{HeartbeatRepo, JobRepo};

use crate::engine::lifecycle;
use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Default number of results returned by the results endpoint.
const DEFAULT_RESULTS_LIMIT: usize = 100;

/// Upper bound on the results endpoint's `limit`.
const MAX_RESULTS_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn find_job(pool: &sqlx::PgPool, job_id: JobId) -> AppResult<Job> {
    let job = JobRepo::find_by_id(pool, job_id)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        })?;
    Ok(job)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Create a job. It starts in `init_startup` with a `start` command queued
/// in the outbox. Returns 201 with the created job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<CreateJob>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let job = lifecycle::create_job(&state.pool, input.source_ref.trim()).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// List jobs newest first. Supports optional `status`, `limit` and
/// `offset` query parameters.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = JobRepo::list(&state.pool, &params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state.pool, job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/progress
///
/// The most recent heartbeat for the job, or `null` if none arrived yet.
pub async fn get_progress(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    find_job(&state.pool, job_id).await?;
    let latest = HeartbeatRepo::latest_for_job(&state.pool, job_id).await?;
    Ok(Json(DataResponse { data: latest }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultsQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/jobs/{id}/results
///
/// Stored detection results, highest unit index first.
pub async fn list_results(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Query(params): Query<ResultsQuery>,
) -> AppResult<impl IntoResponse> {
    find_job(&state.pool, job_id).await?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RESULTS_LIMIT)
        .clamp(1, MAX_RESULTS_LIMIT);
    let results = state.results.recent_results(job_id, limit).await?;
    Ok(Json(DataResponse { data: results }))
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/actions
///
/// Request `start` or `stop`. Returns the job in its new status, or 409
/// when the action is not allowed from the current one.
pub async fn request_action(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(input): Json<RequestAction>,
) -> AppResult<impl IntoResponse> {
    let job = lifecycle::request_action(&state.pool, job_id, input.action).await?;
    Ok(Json(DataResponse { data: job }))
}
