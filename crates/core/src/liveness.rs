//! Liveness policy shared by the watchdog and the worker task manager.

use std::time::Duration;

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// How often a running task emits a heartbeat.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How often the watchdog scans for stalled jobs. Also the staleness
/// threshold: an `active` job with no heartbeat newer than this is stalled.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

/// A worker's local running record is considered live for this many
/// heartbeat intervals after its last refresh.
pub const FRESHNESS_HEARTBEATS: u32 = 3;

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Whether a local running record refreshed at `updated_at` still proves a
/// task is alive, i.e. it is younger than [`FRESHNESS_HEARTBEATS`]
/// heartbeat intervals.
///
/// A window too large to represent never proves liveness, so a
/// misconfigured interval cannot block restarts forever.
pub fn is_record_fresh(updated_at: Timestamp, now: Timestamp, heartbeat_interval: Duration) -> bool {
    heartbeat_interval
        .checked_mul(FRESHNESS_HEARTBEATS)
        .and_then(|window| chrono::Duration::from_std(window).ok())
        .is_some_and(|window| now - updated_at < window)
}

/// Oldest heartbeat timestamp that still counts as recent for a watchdog
/// scanning every `interval`.
pub fn stale_cutoff(now: Timestamp, interval: Duration) -> Timestamp {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(now)
}
