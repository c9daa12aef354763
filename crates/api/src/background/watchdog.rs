//! Stalled-job watchdog.
//!
//! Every `interval`, finds `active` jobs whose latest heartbeat is missing
//! or older than `interval` and restarts them: status back to
//! `init_startup` with a fresh `start` outbox row, through the same locked
//! transition path client requests use.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use vidflow_core::liveness::stale_cutoff;
use vidflow_core::types::JobId;
use vidflow_db::repositories::HeartbeatRepo;

use crate::engine::lifecycle::restart_stalled;

/// Run the watchdog loop until `cancel` is triggered.
///
/// The first scan happens one full interval after start, so jobs that were
/// healthy before a control-plane restart get a chance to report in.
pub async fn run(pool: PgPool, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Watchdog started");

    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Watchdog stopping");
                break;
            }
            _ = ticker.tick() => {
                match scan_once(&pool, interval).await {
                    Ok(restarted) if !restarted.is_empty() => {
                        tracing::info!(count = restarted.len(), "Watchdog: restarted stalled jobs");
                    }
                    Ok(_) => tracing::debug!("Watchdog: no stalled jobs"),
                    Err(e) => tracing::error!(error = %e, "Watchdog: scan failed"),
                }
            }
        }
    }
}

/// One scan. Returns the ids of the jobs that were restarted.
///
/// A failure restarting one job is logged and does not stop the others.
pub async fn scan_once(pool: &PgPool, interval: Duration) -> Result<Vec<JobId>, sqlx::Error> {
    let cutoff = stale_cutoff(Utc::now(), interval);
    let stalled = HeartbeatRepo::find_stalled(pool, cutoff).await?;

    let mut restarted = Vec::with_capacity(stalled.len());
    for job in stalled {
        match restart_stalled(pool, job.job_id, cutoff).await {
            Ok(Some(_)) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    last_heartbeat = ?job.last_heartbeat,
                    "Job stalled, restart queued",
                );
                restarted.push(job.job_id);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "Watchdog: restart failed");
            }
        }
    }
    Ok(restarted)
}
