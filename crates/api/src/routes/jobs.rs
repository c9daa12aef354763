//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                 -> list_jobs
/// POST   /                 -> create_job
/// GET    /{id}             -> get_job
/// POST   /{id}/actions     -> request_action
/// GET    /{id}/progress    -> get_progress
/// GET    /{id}/results     -> list_results
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::create_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/actions", post(jobs::request_action))
        .route("/{id}/progress", get(jobs::get_progress))
        .route("/{id}/results", get(jobs::list_results))
}
