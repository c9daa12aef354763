#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;
use vidflow_storage::{MemoryStore, S3Settings};

use vidflow_api::config::ServerConfig;
use vidflow_api::router::build_app_router;
use vidflow_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        redis_url: "redis://127.0.0.1:6379".to_string(),
        command_stream: "test:commands".to_string(),
        command_partitions: 1,
        heartbeat_stream: "test:heartbeats".to_string(),
        heartbeat_partitions: 1,
        heartbeat_group: "control-plane".to_string(),
        consumer_name: "test".to_string(),
        dispatch_interval_secs: 1,
        watchdog_interval_secs: 30,
        s3: S3Settings {
            endpoint: None,
            region: None,
            access_key: None,
            secret_key: None,
            results_bucket: "predictions".to_string(),
        },
    }
}

/// Build the production router over `pool` with an empty in-memory result
/// store.
pub fn build_test_app(pool: PgPool) -> Router {
    build_test_app_with_results(pool, MemoryStore::new())
}

/// Same as [`build_test_app`] but reading results from `results`.
pub fn build_test_app_with_results(pool: PgPool, results: MemoryStore) -> Router {
    let config = test_config();
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        results: Arc::new(results),
    };
    build_app_router(state, &config)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
