//! Heartbeat consumer.
//!
//! Reads worker heartbeats from the bus, records each one, and advances the
//! job when the heartbeat is the evidence its current status waits for:
//! a `start` heartbeat moves `in_startup_processing` to `active`, a `stop`
//! heartbeat moves `in_shutdown_processing` (or `active`) to `inactive`.
//! Anything else is recorded without a status change.

use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use vidflow_bus::{BusError, Delivery, HeartbeatEvent, Subscriber};
use vidflow_core::backoff::BackoffConfig;
use vidflow_core::lifecycle::{heartbeat_targets, JobStatus};
use vidflow_core::types::JobId;
use vidflow_db::models::heartbeat::NewHeartbeat;
use vidflow_db::repositories::{HeartbeatRepo, JobRepo};

/// What handling one delivery amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The job moved to the contained status.
    Advanced(JobId, JobStatus),
    /// Recorded; the job's status did not change.
    Recorded(JobId),
    /// Recorded, but no such job exists.
    UnknownJob(JobId),
    /// The payload did not decode and was discarded.
    Malformed,
}

/// Record one heartbeat delivery and apply its status effect.
///
/// Idempotent: replaying a delivery records a second row and leaves the
/// status where the first one put it.
pub async fn process_heartbeat(
    pool: &PgPool,
    delivery: &Delivery,
) -> Result<HeartbeatOutcome, sqlx::Error> {
    let event: HeartbeatEvent = match delivery.decode() {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(stream = %delivery.stream, id = %delivery.id, error = %e, "Discarding malformed heartbeat");
            return Ok(HeartbeatOutcome::Malformed);
        }
    };

    HeartbeatRepo::insert(
        pool,
        &NewHeartbeat {
            job_id: event.job_id,
            action: event.action,
            unit_index: event.unit_index,
            timestamp: event.timestamp,
        },
    )
    .await?;

    let (expected, next) = heartbeat_targets(event.action);
    if JobRepo::advance_status(pool, event.job_id, expected, next).await? {
        tracing::info!(
            job_id = %event.job_id,
            action = %event.action,
            unit_index = event.unit_index,
            status = %next,
            "Job advanced by heartbeat",
        );
        return Ok(HeartbeatOutcome::Advanced(event.job_id, next));
    }

    if JobRepo::find_by_id(pool, event.job_id).await?.is_none() {
        tracing::warn!(job_id = %event.job_id, "Heartbeat for unknown job");
        return Ok(HeartbeatOutcome::UnknownJob(event.job_id));
    }

    tracing::debug!(
        job_id = %event.job_id,
        action = %event.action,
        unit_index = event.unit_index,
        "Heartbeat recorded",
    );
    Ok(HeartbeatOutcome::Recorded(event.job_id))
}

/// Long-running consumer of the heartbeat topic.
pub struct HeartbeatConsumer<S: Subscriber> {
    pool: PgPool,
    subscriber: S,
    backoff: BackoffConfig,
}

impl<S: Subscriber> HeartbeatConsumer<S> {
    pub fn new(pool: PgPool, subscriber: S) -> Self {
        Self {
            pool,
            subscriber,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Consume until cancelled.
    ///
    /// A delivery is acknowledged only after it has been handled. On a
    /// database or bus error the batch is abandoned, the loop backs off and
    /// the unacknowledged deliveries come back on the next poll.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Heartbeat consumer started");
        let mut failures: u32 = 0;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.consume_batch() => result,
            };

            match result {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.backoff.delay_for(failures);
                    tracing::warn!(
                        error = %e,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "Heartbeat batch failed, backing off",
                    );
                    if sleep_or_cancel(delay, &cancel).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Heartbeat consumer shutting down");
    }

    /// Poll once and handle every delivery in the batch. Returns how many
    /// deliveries were acknowledged.
    pub async fn consume_batch(&mut self) -> Result<usize, ConsumeError> {
        let batch = self.subscriber.poll().await?;
        let mut acked = 0;
        for delivery in &batch {
            process_heartbeat(&self.pool, delivery).await?;
            self.subscriber.ack(delivery).await?;
            acked += 1;
        }
        Ok(acked)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Returns `true` if cancellation won.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
