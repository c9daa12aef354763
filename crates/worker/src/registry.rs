//! In-process registry of running processing tasks, keyed by job id.
//!
//! An entry's presence is the only authority, inside one process, for
//! "a task is running for this job". Every registration gets a fresh task
//! id; removal is conditional on it, so a task that finishes late never
//! unregisters the replacement started after it was cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vidflow_core::types::JobId;

/// Identity of one registered task.
pub type TaskId = u64;

/// Handed to the caller of a successful [`TaskRegistry::register`].
#[derive(Debug, Clone)]
pub struct TaskTicket {
    pub task_id: TaskId,
    pub cancel: CancellationToken,
}

struct Entry {
    task_id: TaskId,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub struct TaskRegistry {
    entries: Mutex<HashMap<JobId, Entry>>,
    next_task_id: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new task for `job_id` with a cancellation token derived
    /// from `parent`.
    ///
    /// Returns `None` if a live task is already registered. An entry whose
    /// task was cancelled but has not finished yet is replaced.
    pub fn register(&self, job_id: JobId, parent: &CancellationToken) -> Option<TaskTicket> {
        let mut entries = self.lock();
        if entries.get(&job_id).is_some_and(|e| !e.cancel.is_cancelled()) {
            return None;
        }

        let ticket = TaskTicket {
            task_id: self.next_task_id.fetch_add(1, Ordering::Relaxed) + 1,
            cancel: parent.child_token(),
        };
        entries.insert(
            job_id,
            Entry {
                task_id: ticket.task_id,
                cancel: ticket.cancel.clone(),
                handle: None,
            },
        );
        Some(ticket)
    }

    /// Attach the spawned task's handle so shutdown can wait for it. A
    /// no-op if the task already unregistered itself.
    pub fn attach(&self, job_id: JobId, task_id: TaskId, handle: JoinHandle<()>) {
        if let Some(entry) = self.lock().get_mut(&job_id) {
            if entry.task_id == task_id {
                entry.handle = Some(handle);
            }
        }
    }

    /// Whether a task that has not been cancelled is registered.
    pub fn is_running(&self, job_id: JobId) -> bool {
        self.lock()
            .get(&job_id)
            .is_some_and(|e| !e.cancel.is_cancelled())
    }

    /// Signal the registered task to stop. The entry stays until the task
    /// removes itself. Returns `false` if nothing was registered.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.lock().get(&job_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `job_id` if it still belongs to `task_id`.
    pub fn remove_if(&self, job_id: JobId, task_id: TaskId) -> bool {
        let mut entries = self.lock();
        if entries.get(&job_id).is_some_and(|e| e.task_id == task_id) {
            entries.remove(&job_id);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every task and wait up to `timeout` for each to exit.
    pub async fn shutdown(&self, timeout: Duration) {
        let drained: Vec<(JobId, Entry)> = self.lock().drain().collect();
        for (_, entry) in &drained {
            entry.cancel.cancel();
        }
        for (job_id, entry) in drained {
            if let Some(handle) = entry.handle {
                if tokio::time::timeout(timeout, handle).await.is_err() {
                    tracing::warn!(job_id = %job_id, "Task did not stop within the shutdown timeout");
                }
            }
        }
    }
}
