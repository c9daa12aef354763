/// Jobs are identified by UUIDs assigned at creation and never reused.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Position of a unit (frame) within a job's ordered unit list.
pub type UnitIndex = i64;
