//! Repository for the `outbox` table.
//!
//! Rows move one way: inserted unprocessed, then stamped `processed_at`
//! either by the dispatcher after a successful publish or by a transition
//! that supersedes them. `processed_at` is never cleared.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use vidflow_core::lifecycle::JobAction;
use vidflow_core::types::JobId;

use crate::models::outbox::{ClaimedCommand, OutboxMessage};

/// Column list for `outbox` queries.
const COLUMNS: &str = "id, job_id, action, created_at, processed_at";

/// Provides persistence operations for outbox rows.
pub struct OutboxRepo;

impl OutboxRepo {
    /// Queue a command for a job inside the caller's transaction.
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        job_id: JobId,
        action: JobAction,
    ) -> Result<OutboxMessage, sqlx::Error> {
        let query = format!(
            "INSERT INTO outbox (id, job_id, action) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, OutboxMessage>(&query)
            .bind(Uuid::now_v7())
            .bind(job_id)
            .bind(action.as_str())
            .fetch_one(&mut **tx)
            .await
    }

    /// Mark every unprocessed row of a job as processed without publishing.
    ///
    /// Returns the number of rows retired.
    pub async fn cancel_pending(
        tx: &mut Transaction<'_, Postgres>,
        job_id: JobId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE outbox SET processed_at = NOW() \
             WHERE job_id = $1 AND processed_at IS NULL",
        )
        .bind(job_id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Claim the oldest unprocessed row for publication.
    ///
    /// Locks both the outbox row and its job row with `FOR UPDATE SKIP
    /// LOCKED`: rows held by another dispatcher, and jobs in the middle of a
    /// client transition, are skipped rather than waited on. The locks are
    /// held until the caller's transaction ends.
    pub async fn claim_next(
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Option<ClaimedCommand>, sqlx::Error> {
        sqlx::query_as::<_, ClaimedCommand>(
            "SELECT o.id, o.job_id, o.action, j.source_ref, o.created_at \
             FROM outbox o \
             JOIN jobs j ON j.id = o.job_id \
             WHERE o.processed_at IS NULL \
             ORDER BY o.created_at ASC, o.id ASC \
             LIMIT 1 \
             FOR UPDATE OF o, j SKIP LOCKED",
        )
        .fetch_optional(&mut **tx)
        .await
    }

    /// Stamp a claimed row as handed off to the bus.
    pub async fn mark_processed(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE outbox SET processed_at = NOW() WHERE id = $1 AND processed_at IS NULL")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// All rows for a job, oldest first.
    pub async fn list_for_job(pool: &PgPool, job_id: JobId) -> Result<Vec<OutboxMessage>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM outbox WHERE job_id = $1 ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, OutboxMessage>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    /// Unprocessed rows for a job, oldest first.
    pub async fn list_pending_for_job(
        pool: &PgPool,
        job_id: JobId,
    ) -> Result<Vec<OutboxMessage>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM outbox \
             WHERE job_id = $1 AND processed_at IS NULL \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, OutboxMessage>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
