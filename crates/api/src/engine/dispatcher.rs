//! Outbox dispatcher.
//!
//! Drains unprocessed outbox rows to the command topic, oldest first. Each
//! row is claimed with `FOR UPDATE SKIP LOCKED`, published while the claim
//! is held, and only then marked processed together with the job's move to
//! its `*_processing` status. A failed publish rolls the claim back and the
//! row is picked up again on a later tick.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use vidflow_bus::{send, BusError, JobCommand, Publisher};
use vidflow_core::lifecycle::{dispatched_status, pending_status};
use vidflow_db::repositories::{JobRepo, OutboxRepo};

/// Default polling interval for the dispatcher loop.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Rows published per tick at most.
const DEFAULT_BATCH_SIZE: usize = 1;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Publish failed: {0}")]
    Publish(#[from] BusError),
}

/// Background outbox dispatcher.
pub struct OutboxDispatcher {
    pool: PgPool,
    publisher: Arc<dyn Publisher>,
    poll_interval: Duration,
    batch_size: usize,
}

impl OutboxDispatcher {
    pub fn new(pool: PgPool, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            pool,
            publisher,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Outbox dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Outbox dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.dispatch_once().await {
                        Ok(0) => {}
                        Ok(published) => tracing::debug!(published, "Dispatch cycle complete"),
                        Err(e) => tracing::error!(error = %e, "Dispatch cycle failed, retrying next tick"),
                    }
                }
            }
        }
    }

    /// One dispatch cycle. Publishes up to the batch size and returns how
    /// many rows were handed off.
    ///
    /// Stops at the first failure; rows published before it stay processed.
    pub async fn dispatch_once(&self) -> Result<usize, DispatchError> {
        let mut published = 0;

        while published < self.batch_size {
            let mut tx = self.pool.begin().await?;
            let Some(row) = OutboxRepo::claim_next(&mut tx).await? else {
                break;
            };

            let command = JobCommand {
                job_id: row.job_id,
                action: row.action,
                source_ref: row.source_ref.clone(),
            };
            if let Err(e) = send(self.publisher.as_ref(), &command).await {
                tracing::warn!(
                    outbox_id = %row.id,
                    job_id = %row.job_id,
                    action = %row.action,
                    error = %e,
                    "Publish failed, leaving outbox row pending",
                );
                return Err(e.into());
            }

            OutboxRepo::mark_processed(&mut tx, row.id).await?;
            let advanced = JobRepo::advance_status(
                &mut *tx,
                row.job_id,
                &[pending_status(row.action)],
                dispatched_status(row.action),
            )
            .await?;
            tx.commit().await?;

            if advanced {
                tracing::info!(
                    outbox_id = %row.id,
                    job_id = %row.job_id,
                    action = %row.action,
                    "Command published",
                );
            } else {
                tracing::warn!(
                    outbox_id = %row.id,
                    job_id = %row.job_id,
                    action = %row.action,
                    "Command published but job had left its pending status",
                );
            }
            published += 1;
        }

        Ok(published)
    }
}
