//! Worker task manager.
//!
//! Turns `start`/`stop` commands into running tasks and stop
//! acknowledgements. A `start` launches at most one task per job; a `stop`
//! is only recorded locally and carried out by the periodic
//! reconciliation pass, which cancels the task (if this process has one),
//! reports a `stop` heartbeat with the durable progress and clears the
//! record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use vidflow_bus::JobCommand;
use vidflow_core::lifecycle::JobAction;
use vidflow_core::liveness::is_record_fresh;
use vidflow_core::types::{JobId, UnitIndex};
use vidflow_storage::StorageError;

use crate::local_store::LocalStoreError;
use crate::processor::{publish_heartbeat, run_job, ProcessOutcome, ProcessingContext};
use crate::registry::TaskRegistry;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    LocalStore(#[from] LocalStoreError),

    #[error("Result store error: {0}")]
    Storage(#[from] StorageError),
}

/// What a command amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Started,
    /// A task is already running here, or the local record says one was
    /// alive moments ago.
    DuplicateStart,
    StopRecorded,
}

pub struct TaskManager {
    ctx: Arc<ProcessingContext>,
    registry: Arc<TaskRegistry>,
    /// Parent of every task's cancellation token.
    shutdown: CancellationToken,
    /// Held while a command or one reconciled record is applied, so a
    /// start and a stop acknowledgement never interleave.
    apply_lock: Mutex<()>,
}

impl TaskManager {
    pub fn new(ctx: Arc<ProcessingContext>, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            registry: Arc::new(TaskRegistry::new()),
            shutdown,
            apply_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub async fn handle_command(&self, command: &JobCommand) -> Result<CommandOutcome, TaskError> {
        let _guard = self.apply_lock.lock().await;
        match command.action {
            JobAction::Start => self.start(command.job_id, &command.source_ref, false).await,
            JobAction::Stop => {
                self.ctx
                    .local
                    .record(command.job_id, JobAction::Stop, &command.source_ref)
                    .await?;
                tracing::info!(job_id = %command.job_id, "Stop recorded");
                Ok(CommandOutcome::StopRecorded)
            }
        }
    }

    /// Start a task for `job_id` unless one is already running. The caller
    /// holds `apply_lock`.
    ///
    /// `inherited` skips the freshness check for records left behind by a
    /// previous run of this process.
    async fn start(
        &self,
        job_id: JobId,
        source_ref: &str,
        inherited: bool,
    ) -> Result<CommandOutcome, TaskError> {
        let existing = self.ctx.local.find(job_id).await?;

        if existing.as_ref().is_some_and(|r| r.action == JobAction::Stop) {
            tracing::debug!(job_id = %job_id, "Start over a pending stop, reconciling first");
            self.acknowledge_stop(job_id).await?;
        }

        if self.registry.is_running(job_id) {
            tracing::debug!(job_id = %job_id, "Task already running, ignoring start");
            return Ok(CommandOutcome::DuplicateStart);
        }

        if !inherited {
            let fresh = existing.as_ref().is_some_and(|r| {
                r.action == JobAction::Start
                    && is_record_fresh(r.updated_at, Utc::now(), self.ctx.settings.heartbeat_interval)
            });
            if fresh {
                tracing::debug!(job_id = %job_id, "Local record is fresh, ignoring start");
                return Ok(CommandOutcome::DuplicateStart);
            }
        }

        let Some(ticket) = self.registry.register(job_id, &self.shutdown) else {
            return Ok(CommandOutcome::DuplicateStart);
        };

        if let Err(e) = self.ctx.local.record(job_id, JobAction::Start, source_ref).await {
            self.registry.remove_if(job_id, ticket.task_id);
            return Err(e.into());
        }

        let ctx = Arc::clone(&self.ctx);
        let registry = Arc::clone(&self.registry);
        let source_ref = source_ref.to_string();
        let task_id = ticket.task_id;
        let handle = tokio::spawn(async move {
            match run_job(ctx, job_id, &source_ref, ticket.cancel).await {
                Ok(ProcessOutcome::Completed { units }) => {
                    tracing::info!(job_id = %job_id, units, "Task finished");
                }
                Ok(ProcessOutcome::Cancelled) => {
                    tracing::info!(job_id = %job_id, "Task cancelled");
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Task terminated");
                }
            }
            registry.remove_if(job_id, task_id);
        });
        self.registry.attach(job_id, task_id, handle);

        tracing::info!(job_id = %job_id, task_id, inherited, "Task started");
        Ok(CommandOutcome::Started)
    }

    /// Resume every `start` record left by a previous run of this process.
    pub async fn resume_inherited(&self) -> Result<usize, TaskError> {
        let records = self.ctx.local.list_by_action(JobAction::Start).await?;
        let mut resumed = 0;
        for record in records {
            let _guard = self.apply_lock.lock().await;
            if self.start(record.id, &record.source_ref, true).await? == CommandOutcome::Started {
                resumed += 1;
            }
        }
        if resumed > 0 {
            tracing::info!(resumed, "Resumed inherited jobs");
        }
        Ok(resumed)
    }

    /// Carry out every recorded stop. Returns how many were acknowledged.
    ///
    /// A failure on one record is logged and retried on the next pass.
    pub async fn reconcile(&self) -> Result<usize, TaskError> {
        let records = self.ctx.local.list_by_action(JobAction::Stop).await?;
        let mut acknowledged = 0;
        for record in &records {
            let _guard = self.apply_lock.lock().await;
            match self.acknowledge_stop(record.id).await {
                Ok(true) => acknowledged += 1,
                Ok(false) => {
                    tracing::debug!(job_id = %record.id, "Stop superseded since the listing");
                }
                Err(e) => {
                    tracing::warn!(job_id = %record.id, error = %e, "Stop reconciliation failed");
                }
            }
        }
        Ok(acknowledged)
    }

    /// Cancel, report and clear a recorded stop. The caller holds
    /// `apply_lock`.
    ///
    /// The record is re-read first: returns `false` without touching the
    /// task when it no longer carries `stop`.
    async fn acknowledge_stop(&self, job_id: JobId) -> Result<bool, TaskError> {
        let pending = self.ctx.local.find(job_id).await?;
        if !pending.is_some_and(|r| r.action == JobAction::Stop) {
            return Ok(false);
        }

        let cancelled = self.registry.cancel(job_id);
        let progress = self.ctx.results.count_results(job_id).await?;

        publish_heartbeat(
            self.ctx.heartbeats.as_ref(),
            job_id,
            JobAction::Stop,
            progress as UnitIndex,
        )
        .await;
        self.ctx
            .local
            .delete_with_action(job_id, JobAction::Stop)
            .await?;

        tracing::info!(job_id = %job_id, cancelled, progress, "Stop acknowledged");
        Ok(true)
    }

    /// Run the reconciliation pass every `interval` until `cancel` fires.
    pub async fn run_reconciler(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile().await {
                        tracing::error!(error = %e, "Reconciliation pass failed");
                    }
                }
            }
        }
    }

    /// Cancel all tasks and wait for them. Local records are kept so the
    /// next process inherits the jobs.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutdown.cancel();
        let running = self.registry.len();
        self.registry.shutdown(timeout).await;
        tracing::info!(tasks = running, "Task manager shut down");
    }
}
