use std::str::FromStr;
use std::time::Duration;

use vidflow_core::liveness::DEFAULT_HEARTBEAT_INTERVAL;
use vidflow_storage::S3Settings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "WORKER_PARTITIONS is required: list the command partitions this worker owns \
         (e.g. \"0,1\"), or \"all\" when it is the only worker"
    )]
    MissingPartitions,

    #[error("WORKER_PARTITIONS={raw:?} names no partition below {partitions}")]
    NoValidPartitions { raw: String, partitions: u32 },
}

/// Worker configuration loaded from environment variables.
///
/// `LOCAL_DATABASE_URL` is required and read by `main` directly.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    /// Consumer name inside the command group. Stable across restarts of
    /// the same worker so its unacknowledged commands come back to it.
    pub worker_id: String,
    pub command_stream: String,
    pub command_partitions: u32,
    pub command_group: String,
    /// Command partitions this worker reads. Every partition must be owned
    /// by exactly one worker: all commands of a job then reach the same
    /// process, in order.
    pub worker_partitions: Vec<u32>,
    pub heartbeat_stream: String,
    pub heartbeat_partitions: u32,
    pub detection_endpoint: String,
    pub detection_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    /// Attempts per unit, and per unit-resolution step, before giving up.
    pub max_unit_attempts: u32,
    pub max_in_flight_units: usize,
    pub shutdown_timeout_secs: u64,
    pub s3: S3Settings,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                   |
    /// |---------------------------|---------------------------|
    /// | `REDIS_URL`               | `redis://127.0.0.1:6379`  |
    /// | `WORKER_PARTITIONS`       | required (`0,2` or `all`) |
    /// | `WORKER_ID`               | `worker-p<partitions>`    |
    /// | `COMMAND_STREAM`          | `vidflow:commands`        |
    /// | `COMMAND_PARTITIONS`      | `4`                       |
    /// | `COMMAND_GROUP`           | `workers`                 |
    /// | `HEARTBEAT_STREAM`        | `vidflow:heartbeats`      |
    /// | `HEARTBEAT_PARTITIONS`    | `1`                       |
    /// | `DETECTION_ENDPOINT`      | `http://127.0.0.1:8000`   |
    /// | `DETECTION_TIMEOUT_SECS`  | `30`                      |
    /// | `HEARTBEAT_INTERVAL_SECS` | `5`                       |
    /// | `RECONCILE_INTERVAL_SECS` | `5`                       |
    /// | `MAX_UNIT_ATTEMPTS`       | `3`                       |
    /// | `MAX_IN_FLIGHT_UNITS`     | `1`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `30`                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        let command_partitions: u32 = env_or("COMMAND_PARTITIONS", 4).max(1);
        let worker_partitions = owned_partitions(
            std::env::var("WORKER_PARTITIONS").ok().as_deref(),
            command_partitions,
        )?;

        Ok(Self {
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379".to_string()),
            worker_id: env_or("WORKER_ID", default_worker_id(&worker_partitions)),
            command_stream: env_or("COMMAND_STREAM", "vidflow:commands".to_string()),
            command_partitions,
            command_group: env_or("COMMAND_GROUP", "workers".to_string()),
            worker_partitions,
            heartbeat_stream: env_or("HEARTBEAT_STREAM", "vidflow:heartbeats".to_string()),
            heartbeat_partitions: env_or("HEARTBEAT_PARTITIONS", 1),
            detection_endpoint: env_or("DETECTION_ENDPOINT", "http://127.0.0.1:8000".to_string()),
            detection_timeout_secs: env_or("DETECTION_TIMEOUT_SECS", 30),
            heartbeat_interval_secs: env_or(
                "HEARTBEAT_INTERVAL_SECS",
                DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
            ),
            reconcile_interval_secs: env_or("RECONCILE_INTERVAL_SECS", 5),
            max_unit_attempts: env_or("MAX_UNIT_ATTEMPTS", 3),
            max_in_flight_units: env_or("MAX_IN_FLIGHT_UNITS", 1),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            s3: S3Settings::from_env(),
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_secs(self.detection_timeout_secs.max(1))
    }
}

/// Derived from the owned partitions, which are unique to one worker.
fn default_worker_id(partitions: &[u32]) -> String {
    let owned: Vec<String> = partitions.iter().map(u32::to_string).collect();
    format!("worker-p{}", owned.join("-"))
}

/// Resolve `WORKER_PARTITIONS`. Unset or blank is an error; `all` claims
/// every partition.
fn owned_partitions(raw: Option<&str>, partitions: u32) -> Result<Vec<u32>, ConfigError> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty());
    match raw {
        None => Err(ConfigError::MissingPartitions),
        Some(r) if r.eq_ignore_ascii_case("all") => Ok((0..partitions).collect()),
        Some(r) => {
            let owned = parse_partitions(r, partitions);
            if owned.is_empty() {
                return Err(ConfigError::NoValidPartitions {
                    raw: r.to_string(),
                    partitions,
                });
            }
            Ok(owned)
        }
    }
}

/// Parse a comma-separated partition list, dropping entries that are not
/// numbers or are out of range.
fn parse_partitions(raw: &str, partitions: u32) -> Vec<u32> {
    let mut owned: Vec<u32> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<u32>() {
            Ok(p) if p < partitions => Some(p),
            _ => {
                tracing::warn!(partition = s, partitions, "Ignoring invalid WORKER_PARTITIONS entry");
                None
            }
        })
        .collect();
    owned.sort_unstable();
    owned.dedup();
    owned
}

/// Parse an env var, falling back to `default` when unset or invalid.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
