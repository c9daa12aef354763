//! `vidflow-worker` -- runs video-analysis tasks for started jobs.
//!
//! Reads commands from its share of the command partitions, keeps one
//! processing task per started job and publishes heartbeats. See
//! [`WorkerConfig::from_env`] for the environment it reads; the local
//! crash-resume database comes from `LOCAL_DATABASE_URL`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vidflow_bus::redis_streams::{
    self, RedisStreamPublisher, RedisStreamSubscriber, SubscriberConfig, Topic,
};
use vidflow_core::backoff::BackoffConfig;
use vidflow_storage::S3Store;

use vidflow_worker::config::WorkerConfig;
use vidflow_worker::consumer::CommandConsumer;
use vidflow_worker::detection::HttpDetector;
use vidflow_worker::local_store::PgLocalJobStore;
use vidflow_worker::processor::{ProcessingContext, ProcessorSettings};
use vidflow_worker::task_manager::TaskManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        worker_id = %config.worker_id,
        partitions = ?config.worker_partitions,
        "Loaded worker configuration",
    );

    // --- Local database ---
    let database_url =
        std::env::var("LOCAL_DATABASE_URL").context("LOCAL_DATABASE_URL must be set")?;
    let pool = vidflow_db::create_pool(&database_url)
        .await
        .context("Failed to connect to local database")?;
    vidflow_db::run_worker_migrations(&pool)
        .await
        .context("Failed to run local database migrations")?;
    tracing::info!("Local database ready");

    // --- Message bus ---
    let redis = redis_streams::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;
    let heartbeats = Arc::new(RedisStreamPublisher::new(
        redis.clone(),
        Topic::new(config.heartbeat_stream.clone(), config.heartbeat_partitions),
    ));
    let commands = RedisStreamSubscriber::new(
        redis,
        SubscriberConfig::new(
            Topic::new(config.command_stream.clone(), config.command_partitions),
            config.command_group.clone(),
            config.worker_id.clone(),
        )
        .with_partitions(config.worker_partitions.clone()),
    )
    .await
    .context("Failed to subscribe to commands")?;

    // --- Storage and detection ---
    let storage = Arc::new(S3Store::connect(&config.s3).await);
    let detector = HttpDetector::new(config.detection_endpoint.clone(), config.detection_timeout())
        .context("Failed to build detection client")?;

    let ctx = Arc::new(ProcessingContext {
        frames: storage.clone(),
        results: storage,
        detector: Arc::new(detector),
        heartbeats,
        local: Arc::new(PgLocalJobStore::new(pool)),
        settings: ProcessorSettings {
            heartbeat_interval: config.heartbeat_interval(),
            max_attempts: config.max_unit_attempts,
            max_in_flight: config.max_in_flight_units,
            backoff: BackoffConfig::default(),
        },
    });

    // --- Tasks ---
    let shutdown = CancellationToken::new();
    let manager = Arc::new(TaskManager::new(ctx, shutdown.child_token()));

    manager
        .resume_inherited()
        .await
        .context("Failed to resume inherited jobs")?;

    let reconciler = {
        let manager = Arc::clone(&manager);
        let cancel = shutdown.child_token();
        let interval = config.reconcile_interval();
        tokio::spawn(async move { manager.run_reconciler(interval, cancel).await })
    };
    let consumer = tokio::spawn(
        CommandConsumer::new(Arc::clone(&manager), commands).run(shutdown.child_token()),
    );
    tracing::info!("Worker running");

    shutdown_signal().await;

    // --- Shutdown ---
    shutdown.cancel();
    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    let _ = tokio::time::timeout(grace, consumer).await;
    let _ = tokio::time::timeout(grace, reconciler).await;
    manager.shutdown(grace).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vidflow_worker=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
