//! Repository for the append-only `heartbeats` table.

use sqlx::{PgExecutor, PgPool};
use vidflow_core::lifecycle::JobStatus;
use vidflow_core::types::{JobId, Timestamp};

use crate::models::heartbeat::{Heartbeat, NewHeartbeat, StalledJob};

/// Column list for `heartbeats` queries.
const COLUMNS: &str = "id, job_id, status, unit_index, timestamp, created_at";

/// Provides persistence operations for heartbeat evidence.
pub struct HeartbeatRepo;

impl HeartbeatRepo {
    /// Record one heartbeat.
    pub async fn insert(pool: &PgPool, input: &NewHeartbeat) -> Result<Heartbeat, sqlx::Error> {
        let query = format!(
            "INSERT INTO heartbeats (job_id, status, unit_index, timestamp) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Heartbeat>(&query)
            .bind(input.job_id)
            .bind(input.action.as_str())
            .bind(input.unit_index)
            .bind(input.timestamp)
            .fetch_one(pool)
            .await
    }

    /// Most recent heartbeat of a job by reported timestamp.
    pub async fn latest_for_job<'e, E>(executor: E, job_id: JobId) -> Result<Option<Heartbeat>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "SELECT {COLUMNS} FROM heartbeats \
             WHERE job_id = $1 \
             ORDER BY timestamp DESC, id DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, Heartbeat>(&query)
            .bind(job_id)
            .fetch_optional(executor)
            .await
    }

    /// `active` jobs whose latest heartbeat is absent or older than `cutoff`.
    pub async fn find_stalled(pool: &PgPool, cutoff: Timestamp) -> Result<Vec<StalledJob>, sqlx::Error> {
        sqlx::query_as::<_, StalledJob>(
            "SELECT j.id AS job_id, h.last_heartbeat \
             FROM jobs j \
             LEFT JOIN ( \
                 SELECT job_id, MAX(timestamp) AS last_heartbeat \
                 FROM heartbeats \
                 GROUP BY job_id \
             ) h ON h.job_id = j.id \
             WHERE j.status = $1 \
               AND (h.last_heartbeat IS NULL OR h.last_heartbeat < $2) \
             ORDER BY j.updated_at ASC",
        )
        .bind(JobStatus::Active.as_str())
        .bind(cutoff)
        .fetch_all(pool)
        .await
    }
}
