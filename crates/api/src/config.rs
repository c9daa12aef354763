use std::str::FromStr;
use std::time::Duration;

use vidflow_core::liveness::DEFAULT_WATCHDOG_INTERVAL;
use vidflow_storage::S3Settings;

/// Control-plane configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development except the
/// database URL, which `main` reads separately.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long background tasks get to stop after shutdown starts.
    pub shutdown_timeout_secs: u64,
    pub redis_url: String,
    /// Base name of the partitioned command streams.
    pub command_stream: String,
    pub command_partitions: u32,
    pub heartbeat_stream: String,
    pub heartbeat_partitions: u32,
    /// Consumer group the control plane reads heartbeats through.
    pub heartbeat_group: String,
    /// This process's consumer name inside `heartbeat_group`. Keep it
    /// stable across restarts so unacknowledged heartbeats come back.
    pub consumer_name: String,
    /// Outbox dispatcher tick.
    pub dispatch_interval_secs: u64,
    /// Watchdog scan interval, also the heartbeat staleness threshold.
    pub watchdog_interval_secs: u64,
    pub s3: S3Settings,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                    |
    /// |--------------------------|----------------------------|
    /// | `HOST`                   | `0.0.0.0`                  |
    /// | `PORT`                   | `3000`                     |
    /// | `CORS_ORIGINS`           | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`   | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `30`                       |
    /// | `REDIS_URL`              | `redis://127.0.0.1:6379`   |
    /// | `COMMAND_STREAM`         | `vidflow:commands`         |
    /// | `COMMAND_PARTITIONS`     | `4`                        |
    /// | `HEARTBEAT_STREAM`       | `vidflow:heartbeats`       |
    /// | `HEARTBEAT_PARTITIONS`   | `1`                        |
    /// | `HEARTBEAT_GROUP`        | `control-plane`            |
    /// | `CONSUMER_NAME`          | `$HOSTNAME` or `control-plane` |
    /// | `DISPATCH_INTERVAL_SECS` | `5`                        |
    /// | `WATCHDOG_INTERVAL_SECS` | `30`                       |
    ///
    /// Object storage settings come from [`S3Settings::from_env`].
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host,
            port: env_or("PORT", 3000),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379".to_string()),
            command_stream: env_or("COMMAND_STREAM", "vidflow:commands".to_string()),
            command_partitions: env_or("COMMAND_PARTITIONS", 4),
            heartbeat_stream: env_or("HEARTBEAT_STREAM", "vidflow:heartbeats".to_string()),
            heartbeat_partitions: env_or("HEARTBEAT_PARTITIONS", 1),
            heartbeat_group: env_or("HEARTBEAT_GROUP", "control-plane".to_string()),
            consumer_name: env_or(
                "CONSUMER_NAME",
                std::env::var("HOSTNAME")
                    .ok()
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| "control-plane".into()),
            ),
            dispatch_interval_secs: env_or("DISPATCH_INTERVAL_SECS", 5),
            watchdog_interval_secs: env_or(
                "WATCHDOG_INTERVAL_SECS",
                DEFAULT_WATCHDOG_INTERVAL.as_secs(),
            ),
            s3: S3Settings::from_env(),
        }
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs.max(1))
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }
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
