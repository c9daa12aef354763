//! Job entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;
use vidflow_core::lifecycle::{JobAction, JobStatus};
use vidflow_core::types::{JobId, Timestamp};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub source_ref: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a job via `POST /api/v1/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJob {
    /// `<bucket>/<prefix>` of the frames to analyse.
    #[validate(
        length(min = 3, max = 1024),
        contains(pattern = "/", message = "source_ref must be <bucket>/<prefix>")
    )]
    pub source_ref: String,
}

/// DTO for `POST /api/v1/jobs/{id}/actions`.
#[derive(Debug, Deserialize)]
pub struct RequestAction {
    pub action: JobAction,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
    /// Maximum number of results. Defaults to 50, capped at 200.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}
