//! Heartbeat evidence recorded by the control plane.

use serde::Serialize;
use sqlx::FromRow;
use vidflow_core::lifecycle::JobAction;
use vidflow_core::types::{JobId, Timestamp, UnitIndex};

/// A row from the `heartbeats` table. The `status` column stores the
/// heartbeat's action.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Heartbeat {
    pub id: i64,
    pub job_id: JobId,
    #[sqlx(rename = "status", try_from = "String")]
    pub action: JobAction,
    pub unit_index: UnitIndex,
    pub timestamp: Timestamp,
    pub created_at: Timestamp,
}

/// Insert payload for a heartbeat received from the bus.
#[derive(Debug, Clone)]
pub struct NewHeartbeat {
    pub job_id: JobId,
    pub action: JobAction,
    pub unit_index: UnitIndex,
    pub timestamp: Timestamp,
}

/// An `active` job whose latest heartbeat is missing or too old.
#[derive(Debug, Clone, FromRow)]
pub struct StalledJob {
    pub job_id: JobId,
    pub last_heartbeat: Option<Timestamp>,
}
