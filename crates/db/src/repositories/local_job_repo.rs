//! Repository for the worker's `local_jobs` table.

use sqlx::PgPool;
use vidflow_core::lifecycle::JobAction;
use vidflow_core::types::JobId;

use crate::models::local_job::LocalJob;

/// Column list for `local_jobs` queries.
const COLUMNS: &str = "id, action, source_ref, created_at, updated_at";

/// Provides persistence operations for the worker's local job mirror.
pub struct LocalJobRepo;

impl LocalJobRepo {
    /// Insert or overwrite a job's local record with `action` and a fresh
    /// `updated_at`.
    pub async fn upsert(
        pool: &PgPool,
        id: JobId,
        action: JobAction,
        source_ref: &str,
    ) -> Result<LocalJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO local_jobs (id, action, source_ref) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE \
             SET action = EXCLUDED.action, \
                 source_ref = EXCLUDED.source_ref, \
                 updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LocalJob>(&query)
            .bind(id)
            .bind(action.as_str())
            .bind(source_ref)
            .fetch_one(pool)
            .await
    }

    /// Find a job's local record.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<LocalJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM local_jobs WHERE id = $1");
        sqlx::query_as::<_, LocalJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Refresh the liveness timestamp of a running record.
    ///
    /// Stop-flagged records are left untouched. Returns `true` if a row was
    /// refreshed.
    pub async fn touch(pool: &PgPool, id: JobId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE local_jobs SET updated_at = NOW() WHERE id = $1 AND action = $2",
        )
        .bind(id)
        .bind(JobAction::Start.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All records carrying `action`, oldest first.
    pub async fn list_by_action(pool: &PgPool, action: JobAction) -> Result<Vec<LocalJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM local_jobs WHERE action = $1 ORDER BY updated_at ASC"
        );
        sqlx::query_as::<_, LocalJob>(&query)
            .bind(action.as_str())
            .fetch_all(pool)
            .await
    }

    /// Delete a record, but only while it still carries `action`.
    ///
    /// Guarding on the action keeps a stop acknowledgement from deleting a
    /// record that a newer start has already flipped back.
    pub async fn delete_with_action(
        pool: &PgPool,
        id: JobId,
        action: JobAction,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM local_jobs WHERE id = $1 AND action = $2")
            .bind(id)
            .bind(action.as_str())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
