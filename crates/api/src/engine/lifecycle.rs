//! Atomic job transitions.
//!
//! Every accepted transition writes the new status and exactly one outbox
//! row in a single transaction, so a committed status change always
//! carries its obligation to publish.

use sqlx::PgPool;
use vidflow_core::error::CoreError;
use vidflow_core::lifecycle::{plan_restart, plan_transition, JobAction};
use vidflow_core::types::{JobId, Timestamp};
use vidflow_db::models::job::Job;
use vidflow_db::repositories::{HeartbeatRepo, JobRepo};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Create a job in `init_startup` with its `start` command queued.
pub async fn create_job(pool: &PgPool, source_ref: &str) -> Result<Job, sqlx::Error> {
    let job = JobRepo::create_with_start(pool, source_ref).await?;
    tracing::info!(job_id = %job.id, source_ref, "Job created");
    Ok(job)
}

/// Apply a client `start`/`stop` request.
///
/// The job row is locked for the whole transaction, so concurrent requests
/// are evaluated one after another. Rejections leave nothing behind.
pub async fn request_action(
    pool: &PgPool,
    job_id: JobId,
    action: JobAction,
) -> Result<Job, LifecycleError> {
    let mut tx = pool.begin().await?;

    let job = JobRepo::lock_for_update(&mut tx, job_id)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        })?;

    let transition = plan_transition(job.status, action)?;
    let updated = JobRepo::apply_transition(&mut tx, job_id, &transition).await?;
    tx.commit().await?;

    tracing::info!(
        job_id = %job_id,
        %action,
        from = %transition.from,
        to = %transition.next,
        cancelled_pending = transition.cancel_pending,
        "Job transition accepted",
    );
    Ok(updated)
}

/// Restart a stalled job on behalf of the watchdog.
///
/// Re-reads the job under its row lock and only restarts it if it is still
/// `active` and has not reported a heartbeat at or after `cutoff` since
/// the scan. Returns `None` when the job moved on.
pub async fn restart_stalled(
    pool: &PgPool,
    job_id: JobId,
    cutoff: Timestamp,
) -> Result<Option<Job>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let Some(job) = JobRepo::lock_for_update(&mut tx, job_id).await? else {
        return Ok(None);
    };
    let Some(transition) = plan_restart(job.status) else {
        tracing::debug!(job_id = %job_id, status = %job.status, "Stalled job moved on, skipping restart");
        return Ok(None);
    };
    if let Some(latest) = HeartbeatRepo::latest_for_job(&mut *tx, job_id).await? {
        if latest.timestamp >= cutoff {
            tracing::debug!(
                job_id = %job_id,
                last_heartbeat = %latest.timestamp,
                "Stalled job reported in since the scan, skipping restart",
            );
            return Ok(None);
        }
    }

    let restarted = JobRepo::apply_transition(&mut tx, job_id, &transition).await?;
    tx.commit().await?;
    Ok(Some(restarted))
}
