//! Postgres persistence for the control plane and the worker's local
//! crash-resume mirror.
//!
//! Repositories are zero-sized structs with associated async functions.
//! Functions that take a `&mut Transaction` compose into the atomic
//! status-change + outbox operations; the rest take a pool.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Run a trivial query to verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the control-plane schema (`jobs`, `outbox`, `heartbeats`).
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}

/// Apply the worker's local schema (`local_jobs`).
pub async fn run_worker_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/worker_migrations").run(pool).await
}
