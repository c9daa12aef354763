pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                      list, create
/// /jobs/{id}                 get
/// /jobs/{id}/actions         start or stop (POST)
/// /jobs/{id}/progress        latest heartbeat
/// /jobs/{id}/results         stored detection results
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}
