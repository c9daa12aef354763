//! Repository for the `jobs` table.
//!
//! Status changes requested by clients or the watchdog go through
//! [`JobRepo::apply_transition`], which writes the status and the outbox
//! row in the caller's transaction. Heartbeat- and dispatch-driven changes
//! use the compare-and-set [`JobRepo::advance_status`].

use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;
use vidflow_core::lifecycle::{JobAction, JobStatus, Transition};
use vidflow_core::types::JobId;

use crate::models::job::{Job, JobListQuery};
use crate::repositories::OutboxRepo;

/// Column list for `jobs` queries.
const COLUMNS: &str = "id, status, source_ref, created_at, updated_at";

/// `updated_at` assignment for status writes. Wall-clock time rather than
/// the transaction start, never earlier than the stored value: a
/// transaction that waited on the row lock must not stamp a time before
/// the write it waited for.
const STAMP_UPDATED_AT: &str = "updated_at = GREATEST(updated_at, clock_timestamp())";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 200;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides persistence operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Create a job in `init_startup` together with its `start` outbox row.
    pub async fn create_with_start(pool: &PgPool, source_ref: &str) -> Result<Job, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO jobs (id, status, source_ref) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(Uuid::now_v7())
            .bind(JobStatus::InitStartup.as_str())
            .bind(source_ref)
            .fetch_one(&mut *tx)
            .await?;

        OutboxRepo::insert(&mut tx, job.id, JobAction::Start).await?;

        tx.commit().await?;
        Ok(job)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Load a job and hold its row lock until the transaction ends.
    ///
    /// Concurrent requests for the same job serialize here, so each is
    /// planned against the status left by the previous one.
    pub async fn lock_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: JobId,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// List jobs newest first with optional status filter and pagination.
    pub async fn list(pool: &PgPool, params: &JobListQuery) -> Result<Vec<Job>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE ($1::TEXT IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(params.status.map(JobStatus::as_str))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Apply an accepted transition inside the caller's transaction.
    ///
    /// Retires still-unprocessed outbox rows when the transition cancels a
    /// pending command, sets the new status and queues exactly one outbox
    /// row for the emitted action. The caller must hold the job's row lock.
    pub async fn apply_transition(
        tx: &mut Transaction<'_, Postgres>,
        id: JobId,
        transition: &Transition,
    ) -> Result<Job, sqlx::Error> {
        if transition.cancel_pending {
            let cancelled = OutboxRepo::cancel_pending(tx, id).await?;
            tracing::debug!(job_id = %id, cancelled, "Retired pending outbox rows");
        }

        let query = format!(
            "UPDATE jobs SET status = $2, {STAMP_UPDATED_AT} \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(transition.next.as_str())
            .fetch_one(&mut **tx)
            .await?;

        OutboxRepo::insert(tx, id, transition.emit).await?;

        Ok(job)
    }

    /// Move a job to `next` only if it is currently in one of `expected`.
    ///
    /// Returns `true` if the row was updated. The check and the write are a
    /// single statement, so concurrent callers cannot both succeed from the
    /// same status.
    pub async fn advance_status<'e, E>(
        executor: E,
        id: JobId,
        expected: &[JobStatus],
        next: JobStatus,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let expected: Vec<&str> = expected.iter().map(|s| s.as_str()).collect();
        let query = format!(
            "UPDATE jobs SET status = $2, {STAMP_UPDATED_AT} \
             WHERE id = $1 AND status = ANY($3)"
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(next.as_str())
            .bind(&expected)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
