//! Object storage for job inputs (frames) and outputs (detection results).
//!
//! The number of results stored for a job is the authoritative resume
//! offset of its processing loop, so result writes are keyed by unit index
//! and overwrite on reprocessing.

pub mod error;
pub mod memory;
pub mod s3;
pub mod source;

use async_trait::async_trait;
use vidflow_core::detection::UnitResult;
use vidflow_core::types::JobId;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use s3::{S3Settings, S3Store};
pub use source::SourceRef;

/// Read side of a job: the ordered units (frames) to process.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Keys of every unit under the source, in processing order.
    async fn list_units(&self, source: &SourceRef) -> Result<Vec<String>, StorageError>;

    /// Download one unit.
    async fn fetch_unit(&self, source: &SourceRef, unit_key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Write side of a job: durable per-unit results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store (or overwrite) the result of one unit.
    async fn store_result(&self, result: &UnitResult) -> Result<(), StorageError>;

    /// Number of units with a stored result.
    async fn count_results(&self, job_id: JobId) -> Result<u64, StorageError>;

    /// Up to `limit` results with the highest unit indexes, newest first.
    async fn recent_results(&self, job_id: JobId, limit: usize) -> Result<Vec<UnitResult>, StorageError>;
}

/// Object key of a unit's result inside the results bucket.
pub fn result_key(job_id: JobId, unit_index: i64) -> String {
    format!("{job_id}/{unit_index:08}.json")
}

/// Unit index encoded in a result key, if it is one.
pub fn parse_result_key(key: &str) -> Option<i64> {
    let file = key.rsplit('/').next()?;
    file.strip_suffix(".json")?.parse().ok()
}
