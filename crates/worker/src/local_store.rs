//! The worker's local job records.
//!
//! One record per job this worker was told about. `start` records are the
//! crash-resume bookkeeping: their `updated_at` is refreshed on every
//! heartbeat and any left behind at startup belong to an interrupted task.
//! `stop` records are stop requests waiting for the reconciliation pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use vidflow_core::lifecycle::JobAction;
use vidflow_core::types::{JobId, Timestamp};
use vidflow_db::models::local_job::LocalJob;
use vidflow_db::repositories::LocalJobRepo;

#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    #[error("Local database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Local store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait LocalJobStore: Send + Sync {
    /// Insert or overwrite the record, stamping `updated_at` with now.
    async fn record(
        &self,
        job_id: JobId,
        action: JobAction,
        source_ref: &str,
    ) -> Result<LocalJob, LocalStoreError>;

    async fn find(&self, job_id: JobId) -> Result<Option<LocalJob>, LocalStoreError>;

    /// Refresh a `start` record's timestamp. Returns `false` when there is
    /// no `start` record for the job.
    async fn touch(&self, job_id: JobId) -> Result<bool, LocalStoreError>;

    async fn list_by_action(&self, action: JobAction) -> Result<Vec<LocalJob>, LocalStoreError>;

    /// Delete the record only while it still carries `action`.
    async fn delete_with_action(
        &self,
        job_id: JobId,
        action: JobAction,
    ) -> Result<bool, LocalStoreError>;
}

/// Records kept in the worker's own Postgres database.
#[derive(Clone)]
pub struct PgLocalJobStore {
    pool: PgPool,
}

impl PgLocalJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocalJobStore for PgLocalJobStore {
    async fn record(
        &self,
        job_id: JobId,
        action: JobAction,
        source_ref: &str,
    ) -> Result<LocalJob, LocalStoreError> {
        Ok(LocalJobRepo::upsert(&self.pool, job_id, action, source_ref).await?)
    }

    async fn find(&self, job_id: JobId) -> Result<Option<LocalJob>, LocalStoreError> {
        Ok(LocalJobRepo::find_by_id(&self.pool, job_id).await?)
    }

    async fn touch(&self, job_id: JobId) -> Result<bool, LocalStoreError> {
        Ok(LocalJobRepo::touch(&self.pool, job_id).await?)
    }

    async fn list_by_action(&self, action: JobAction) -> Result<Vec<LocalJob>, LocalStoreError> {
        Ok(LocalJobRepo::list_by_action(&self.pool, action).await?)
    }

    async fn delete_with_action(
        &self,
        job_id: JobId,
        action: JobAction,
    ) -> Result<bool, LocalStoreError> {
        Ok(LocalJobRepo::delete_with_action(&self.pool, job_id, action).await?)
    }
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<JobId, LocalJob>,
    unavailable: bool,
}

/// In-memory records. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryLocalJobStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLocalJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<MutexGuard<'_, MemoryState>, LocalStoreError> {
        let state = self.lock();
        if state.unavailable {
            return Err(LocalStoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(state)
    }

    /// Make every call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Overwrite a record's `updated_at`, e.g. to age it past the
    /// freshness window.
    pub fn set_updated_at(&self, job_id: JobId, at: Timestamp) {
        if let Some(record) = self.lock().records.get_mut(&job_id) {
            record.updated_at = at;
        }
    }

    pub fn get(&self, job_id: JobId) -> Option<LocalJob> {
        self.lock().records.get(&job_id).cloned()
    }
}

#[async_trait]
impl LocalJobStore for MemoryLocalJobStore {
    async fn record(
        &self,
        job_id: JobId,
        action: JobAction,
        source_ref: &str,
    ) -> Result<LocalJob, LocalStoreError> {
        let mut state = self.check()?;
        let now = Utc::now();
        let record = state.records.entry(job_id).or_insert_with(|| LocalJob {
            id: job_id,
            action,
            source_ref: source_ref.to_string(),
            created_at: now,
            updated_at: now,
        });
        record.action = action;
        record.source_ref = source_ref.to_string();
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn find(&self, job_id: JobId) -> Result<Option<LocalJob>, LocalStoreError> {
        Ok(self.check()?.records.get(&job_id).cloned())
    }

    async fn touch(&self, job_id: JobId) -> Result<bool, LocalStoreError> {
        let mut state = self.check()?;
        match state.records.get_mut(&job_id) {
            Some(record) if record.action == JobAction::Start => {
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_action(&self, action: JobAction) -> Result<Vec<LocalJob>, LocalStoreError> {
        let mut records: Vec<LocalJob> = self
            .check()?
            .records
            .values()
            .filter(|r| r.action == action)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        Ok(records)
    }

    async fn delete_with_action(
        &self,
        job_id: JobId,
        action: JobAction,
    ) -> Result<bool, LocalStoreError> {
        let mut state = self.check()?;
        if state.records.get(&job_id).is_some_and(|r| r.action == action) {
            state.records.remove(&job_id);
            return Ok(true);
        }
        Ok(false)
    }
}
