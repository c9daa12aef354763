//! In-memory frame source and result store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use vidflow_core::detection::UnitResult;
use vidflow_core::types::{JobId, UnitIndex};

use crate::error::StorageError;
use crate::source::SourceRef;
use crate::{FrameSource, ResultStore};

#[derive(Default)]
struct State {
    frames: HashMap<String, BTreeMap<String, Vec<u8>>>,
    results: HashMap<JobId, BTreeMap<UnitIndex, UnitResult>>,
    store_failures: HashMap<(JobId, UnitIndex), u32>,
    list_failures: u32,
    store_calls: u32,
}

/// Shared in-memory storage. Clones see the same objects.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put `count` frames named `frame_00000.jpg`.. under `source_ref`.
    pub fn add_frames(&self, source_ref: &str, count: usize) -> Vec<String> {
        let prefix = source_ref
            .parse::<SourceRef>()
            .map(|s| s.list_prefix())
            .unwrap_or_default();
        let mut state = self.lock();
        let bucket = state.frames.entry(source_ref.to_string()).or_default();
        (0..count)
            .map(|i| {
                let key = format!("{prefix}frame_{i:05}.jpg");
                bucket.insert(key.clone(), format!("jpeg-{i}").into_bytes());
                key
            })
            .collect()
    }

    /// Store a result directly, as if a previous run had produced it.
    pub fn seed_result(&self, result: UnitResult) {
        self.lock()
            .results
            .entry(result.job_id)
            .or_default()
            .insert(result.unit_index, result);
    }

    /// Make the next `times` writes of one unit fail.
    pub fn fail_store(&self, job_id: JobId, unit_index: UnitIndex, times: u32) {
        self.lock().store_failures.insert((job_id, unit_index), times);
    }

    /// Make the next `times` unit listings fail.
    pub fn fail_listing(&self, times: u32) {
        self.lock().list_failures = times;
    }

    /// Unit indexes with a stored result, ascending.
    pub fn stored_indexes(&self, job_id: JobId) -> Vec<UnitIndex> {
        self.lock()
            .results
            .get(&job_id)
            .map(|r| r.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of result writes attempted, including failed ones.
    pub fn store_calls(&self) -> u32 {
        self.lock().store_calls
    }
}

#[async_trait]
impl FrameSource for MemoryStore {
    async fn list_units(&self, source: &SourceRef) -> Result<Vec<String>, StorageError> {
        let mut state = self.lock();
        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(StorageError::Backend("listing unavailable".into()));
        }
        Ok(state
            .frames
            .get(&source.to_string())
            .map(|frames| frames.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_unit(&self, source: &SourceRef, unit_key: &str) -> Result<Vec<u8>, StorageError> {
        self.lock()
            .frames
            .get(&source.to_string())
            .and_then(|frames| frames.get(unit_key).cloned())
            .ok_or_else(|| StorageError::NotFound {
                bucket: source.bucket.clone(),
                key: unit_key.to_string(),
            })
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn store_result(&self, result: &UnitResult) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.store_calls += 1;
        if let Some(remaining) = state.store_failures.get_mut(&(result.job_id, result.unit_index)) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StorageError::Backend("write rejected".into()));
            }
        }
        state
            .results
            .entry(result.job_id)
            .or_default()
            .insert(result.unit_index, result.clone());
        Ok(())
    }

    async fn count_results(&self, job_id: JobId) -> Result<u64, StorageError> {
        Ok(self.lock().results.get(&job_id).map_or(0, |r| r.len() as u64))
    }

    async fn recent_results(&self, job_id: JobId, limit: usize) -> Result<Vec<UnitResult>, StorageError> {
        Ok(self
            .lock()
            .results
            .get(&job_id)
            .map(|r| r.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
