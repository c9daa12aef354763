//! Command consumer: feeds the command topic into the task manager.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vidflow_bus::{BusError, JobCommand, Subscriber};
use vidflow_core::backoff::BackoffConfig;

use crate::task_manager::{TaskError, TaskManager};

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

pub struct CommandConsumer<S: Subscriber> {
    manager: Arc<TaskManager>,
    subscriber: S,
    backoff: BackoffConfig,
}

impl<S: Subscriber> CommandConsumer<S> {
    pub fn new(manager: Arc<TaskManager>, subscriber: S) -> Self {
        Self {
            manager,
            subscriber,
            backoff: BackoffConfig::default(),
        }
    }

    /// Consume until cancelled, backing off after failed batches.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Command consumer started");
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
                        "Command batch failed, backing off",
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::info!("Command consumer stopped");
    }

    /// Poll once and handle the batch in order. A command is acknowledged
    /// only after the task manager accepted it; malformed payloads are
    /// acknowledged and dropped.
    pub async fn consume_batch(&mut self) -> Result<usize, ConsumeError> {
        let batch = self.subscriber.poll().await?;
        let mut acked = 0;
        for delivery in &batch {
            match delivery.decode::<JobCommand>() {
                Ok(command) => {
                    let outcome = self.manager.handle_command(&command).await?;
                    tracing::debug!(
                        job_id = %command.job_id,
                        action = %command.action,
                        ?outcome,
                        "Command handled",
                    );
                }
                Err(e) => {
                    tracing::warn!(stream = %delivery.stream, id = %delivery.id, error = %e, "Discarding malformed command");
                }
            }
            self.subscriber.ack(delivery).await?;
            acked += 1;
        }
        Ok(acked)
    }
}
