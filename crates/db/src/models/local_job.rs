use serde::Serialize;
use sqlx::FromRow;
use vidflow_core::lifecycle::JobAction;
use vidflow_core::types::{JobId, Timestamp};

/// A row from the worker's `local_jobs` table.
///
/// `action = start` means a task is (or should be) running here and
/// `updated_at` is refreshed on every heartbeat; `action = stop` means a
/// stop was requested and not yet acknowledged.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LocalJob {
    pub id: JobId,
    #[sqlx(try_from = "String")]
    pub action: JobAction,
    pub source_ref: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
