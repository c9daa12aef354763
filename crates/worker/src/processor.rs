//! The per-job processing loop.
//!
//! A task resolves its ordered units and a resume offset (the number of
//! results already stored), then walks the remaining units, detecting and
//! storing each one with bounded retries. A heartbeat ticker runs alongside
//! the units and never waits on them. Cancellation is checked at every unit
//! boundary and every tick; in-flight units are allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use vidflow_bus::{send, HeartbeatEvent, Publisher};
use vidflow_core::backoff::BackoffConfig;
use vidflow_core::detection::UnitResult;
use vidflow_core::lifecycle::JobAction;
use vidflow_core::liveness::DEFAULT_HEARTBEAT_INTERVAL;
use vidflow_core::types::{JobId, UnitIndex};
use vidflow_storage::{FrameSource, ResultStore, SourceRef, StorageError};

use crate::detection::{DetectionError, Detector};
use crate::local_store::LocalJobStore;
use crate::unit_group::UnitGroup;

/// Tunables of the processing loop.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub heartbeat_interval: Duration,
    /// Attempts per unit and per resolution step.
    pub max_attempts: u32,
    pub max_in_flight: usize,
    pub backoff: BackoffConfig,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_attempts: 3,
            max_in_flight: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Collaborators shared by every task of a worker process.
pub struct ProcessingContext {
    pub frames: Arc<dyn FrameSource>,
    pub results: Arc<dyn ResultStore>,
    pub detector: Arc<dyn Detector>,
    pub heartbeats: Arc<dyn Publisher>,
    pub local: Arc<dyn LocalJobStore>,
    pub settings: ProcessorSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Invalid source reference: {0}")]
    InvalidSource(#[from] StorageError),

    #[error("Could not resolve units after {attempts} attempts: {source}")]
    Resolve {
        attempts: u32,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every unit was handled and the final `stop` heartbeat was sent.
    Completed { units: u64 },
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
enum UnitError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Detection(#[from] DetectionError),
}

/// Process a job until its units run out or `cancel` fires.
pub async fn run_job(
    ctx: Arc<ProcessingContext>,
    job_id: JobId,
    source_ref: &str,
    cancel: CancellationToken,
) -> Result<ProcessOutcome, ProcessError> {
    let source: SourceRef = source_ref.parse()?;

    let Some((units, offset)) = resolve_units(&ctx, job_id, &source, &cancel).await? else {
        return Ok(ProcessOutcome::Cancelled);
    };
    let total = units.len() as u64;
    tracing::info!(job_id = %job_id, total, offset, "Processing job");

    let settings = &ctx.settings;
    let mut group = UnitGroup::new(settings.max_in_flight);
    let mut ticker = tokio::time::interval(settings.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick is immediate: announce the task before any unit runs.
    let mut next = offset.min(total);
    ticker.tick().await;
    emit_progress(&ctx, job_id, next as UnitIndex).await;

    while next < total {
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => emit_progress(&ctx, job_id, next as UnitIndex).await,
            permit = group.reserve() => {
                let Ok(permit) = permit else { break };
                let unit_index = next as UnitIndex;
                let unit_key = units[next as usize].clone();
                group.spawn(
                    permit,
                    process_unit(Arc::clone(&ctx), job_id, source.clone(), unit_index, unit_key),
                );
                next += 1;
            }
        }
    }

    // Let in-flight units finish, still heartbeating.
    while group.in_flight() > 0 && !cancel.is_cancelled() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => emit_progress(&ctx, job_id, next as UnitIndex).await,
            _ = group.join_next() => {}
        }
    }

    if cancel.is_cancelled() {
        group.wait_all().await;
        tracing::info!(job_id = %job_id, unit_index = next, "Processing cancelled");
        return Ok(ProcessOutcome::Cancelled);
    }

    finish(&ctx, job_id, total).await;
    Ok(ProcessOutcome::Completed { units: total })
}

/// List the units and read the resume offset, retrying with backoff.
///
/// Returns `None` if cancelled while waiting between attempts.
async fn resolve_units(
    ctx: &ProcessingContext,
    job_id: JobId,
    source: &SourceRef,
    cancel: &CancellationToken,
) -> Result<Option<(Vec<String>, u64)>, ProcessError> {
    let max_attempts = ctx.settings.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let resolved = async {
            let units = ctx.frames.list_units(source).await?;
            let offset = ctx.results.count_results(job_id).await?;
            Ok::<_, StorageError>((units, offset))
        }
        .await;

        match resolved {
            Ok(resolved) => return Ok(Some(resolved)),
            Err(error) if attempt >= max_attempts => {
                return Err(ProcessError::Resolve {
                    attempts: attempt,
                    source: error,
                });
            }
            Err(e) => {
                let delay = ctx.settings.backoff.delay_for(attempt);
                tracing::warn!(
                    job_id = %job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Unit resolution failed, retrying",
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Detect and store one unit, retrying up to the attempt limit. A unit
/// that keeps failing is logged and skipped.
async fn process_unit(
    ctx: Arc<ProcessingContext>,
    job_id: JobId,
    source: SourceRef,
    unit_index: UnitIndex,
    unit_key: String,
) {
    let max_attempts = ctx.settings.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match try_unit(&ctx, job_id, &source, unit_index, &unit_key).await {
            Ok(()) => return,
            Err(e) if attempt < max_attempts => {
                let delay = ctx.settings.backoff.delay_for(attempt);
                tracing::debug!(
                    job_id = %job_id,
                    unit_index,
                    attempt,
                    error = %e,
                    "Unit failed, retrying",
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    unit_index,
                    unit_key = %unit_key,
                    attempts = max_attempts,
                    error = %e,
                    "Dropping unit after repeated failures",
                );
            }
        }
    }
}

async fn try_unit(
    ctx: &ProcessingContext,
    job_id: JobId,
    source: &SourceRef,
    unit_index: UnitIndex,
    unit_key: &str,
) -> Result<(), UnitError> {
    let frame = ctx.frames.fetch_unit(source, unit_key).await?;
    let detections = ctx.detector.detect(frame).await?;
    ctx.results
        .store_result(&UnitResult {
            job_id,
            unit_index,
            unit_key: unit_key.to_string(),
            detections,
            produced_at: Utc::now(),
        })
        .await?;
    Ok(())
}

/// Periodic `start` heartbeat plus a refresh of the local record.
async fn emit_progress(ctx: &ProcessingContext, job_id: JobId, unit_index: UnitIndex) {
    publish_heartbeat(ctx.heartbeats.as_ref(), job_id, JobAction::Start, unit_index).await;
    if let Err(e) = ctx.local.touch(job_id).await {
        tracing::warn!(job_id = %job_id, error = %e, "Failed to refresh local record");
    }
}

/// Final `stop` heartbeat, then drop the local record.
async fn finish(ctx: &ProcessingContext, job_id: JobId, total: u64) {
    publish_heartbeat(ctx.heartbeats.as_ref(), job_id, JobAction::Stop, total as UnitIndex).await;
    if let Err(e) = ctx.local.delete_with_action(job_id, JobAction::Start).await {
        tracing::warn!(job_id = %job_id, error = %e, "Failed to clear local record");
    }
    tracing::info!(job_id = %job_id, units = total, "Processing complete");
}

/// Publish a heartbeat; failures are logged and otherwise ignored.
pub async fn publish_heartbeat(
    publisher: &dyn Publisher,
    job_id: JobId,
    action: JobAction,
    unit_index: UnitIndex,
) {
    let event = HeartbeatEvent {
        job_id,
        action,
        unit_index,
        timestamp: Utc::now(),
    };
    match send(publisher, &event).await {
        Ok(()) => tracing::debug!(job_id = %job_id, %action, unit_index, "Heartbeat sent"),
        Err(e) => tracing::warn!(job_id = %job_id, %action, error = %e, "Failed to send heartbeat"),
    }
}
