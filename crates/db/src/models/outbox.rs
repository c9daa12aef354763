//! Outbox rows: commands durably queued for publication.

use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;
use vidflow_core::lifecycle::JobAction;
use vidflow_core::types::{JobId, Timestamp};

/// A row from the `outbox` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub job_id: JobId,
    #[sqlx(try_from = "String")]
    pub action: JobAction,
    pub created_at: Timestamp,
    pub processed_at: Option<Timestamp>,
}

/// An unprocessed outbox row claimed by the dispatcher, joined with the
/// job's source reference so the command can be published as-is.
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedCommand {
    pub id: Uuid,
    pub job_id: JobId,
    #[sqlx(try_from = "String")]
    pub action: JobAction,
    pub source_ref: String,
    pub created_at: Timestamp,
}
