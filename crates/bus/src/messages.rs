//! Wire types carried on the bus.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use vidflow_core::lifecycle::JobAction;
use vidflow_core::types::{JobId, Timestamp, UnitIndex};

/// A JSON message routed by job id.
pub trait BusMessage: Serialize + DeserializeOwned + Send + Sync {
    /// Ordering key. All messages for one job share it.
    fn key(&self) -> JobId;
}

/// Command published by the outbox dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCommand {
    pub job_id: JobId,
    pub action: JobAction,
    pub source_ref: String,
}

impl BusMessage for JobCommand {
    fn key(&self) -> JobId {
        self.job_id
    }
}

/// Liveness and progress report emitted by a worker task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub job_id: JobId,
    pub action: JobAction,
    pub unit_index: UnitIndex,
    pub timestamp: Timestamp,
}

impl BusMessage for HeartbeatEvent {
    fn key(&self) -> JobId {
        self.job_id
    }
}

/// Partition a key falls into. Stable across processes and restarts.
pub fn partition_for(key: JobId, partitions: u32) -> u32 {
    (key.as_u128() % u128::from(partitions.max(1))) as u32
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn command_wire_format() {
        let id = Uuid::new_v4();
        let cmd = JobCommand {
            job_id: id,
            action: JobAction::Start,
            source_ref: "videos/a.mp4".into(),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["job_id"], id.to_string());
        assert_eq!(json["action"], "start");
        assert_eq!(json["source_ref"], "videos/a.mp4");
    }

    #[test]
    fn heartbeat_parses_from_wire() {
        let id = Uuid::new_v4();
        let raw = format!(
            r#"{{"job_id":"{id}","action":"stop","unit_index":12,"timestamp":"2026-03-01T10:00:00Z"}}"#
        );
        let hb: HeartbeatEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(hb.job_id, id);
        assert_eq!(hb.action, JobAction::Stop);
        assert_eq!(hb.unit_index, 12);
        assert!(hb.timestamp < Utc::now());
    }

    #[test]
    fn partition_is_stable_and_in_range() {
        for _ in 0..64 {
            let id = Uuid::new_v4();
            let p = partition_for(id, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for(id, 4));
        }
        assert_eq!(partition_for(Uuid::new_v4(), 0), 0);
    }
}
