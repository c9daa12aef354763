use std::sync::Arc;

use vidflow_storage::ResultStore;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: vidflow_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Where workers store detection results; read by the results endpoint.
    pub results: Arc<dyn ResultStore>,
}
