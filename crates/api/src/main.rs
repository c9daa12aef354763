use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vidflow_bus::redis_streams::{
    self, RedisStreamPublisher, RedisStreamSubscriber, SubscriberConfig, Topic,
};
use vidflow_storage::S3Store;

use vidflow_api::background::watchdog;
use vidflow_api::config::ServerConfig;
use vidflow_api::engine::dispatcher::OutboxDispatcher;
use vidflow_api::engine::heartbeats::HeartbeatConsumer;
use vidflow_api::router::build_app_router;
use vidflow_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = vidflow_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    vidflow_db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    vidflow_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Message bus ---
    let redis = redis_streams::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;
    let publisher = Arc::new(RedisStreamPublisher::new(
        redis.clone(),
        Topic::new(config.command_stream.clone(), config.command_partitions),
    ));
    let heartbeat_subscriber = RedisStreamSubscriber::new(
        redis,
        SubscriberConfig::new(
            Topic::new(config.heartbeat_stream.clone(), config.heartbeat_partitions),
            config.heartbeat_group.clone(),
            config.consumer_name.clone(),
        ),
    )
    .await
    .context("Failed to subscribe to heartbeats")?;
    tracing::info!(
        commands = %config.command_stream,
        heartbeats = %config.heartbeat_stream,
        "Message bus connected",
    );

    // --- Result storage ---
    let results = Arc::new(S3Store::connect(&config.s3).await);

    // --- Background services ---
    let shutdown = CancellationToken::new();

    let dispatcher = OutboxDispatcher::new(pool.clone(), publisher)
        .with_poll_interval(config.dispatch_interval());
    let dispatcher_cancel = shutdown.child_token();
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(dispatcher_cancel).await });

    let consumer = HeartbeatConsumer::new(pool.clone(), heartbeat_subscriber);
    let consumer_handle = tokio::spawn(consumer.run(shutdown.child_token()));

    let watchdog_handle = tokio::spawn(watchdog::run(
        pool.clone(),
        config.watchdog_interval(),
        shutdown.child_token(),
    ));
    tracing::info!("Background services started (dispatcher, heartbeat consumer, watchdog)");

    // --- HTTP server ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        results,
    };
    let app = build_app_router(state, &config);

    let host = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping background services");
    shutdown.cancel();

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    let joined = tokio::time::timeout(grace, async {
        let _ = dispatcher_handle.await;
        let _ = consumer_handle.await;
        let _ = watchdog_handle.await;
    })
    .await;
    if joined.is_err() {
        tracing::warn!(timeout_secs = grace.as_secs(), "Background services did not stop in time");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vidflow_api=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// If a handler cannot be installed the failure is logged and that signal
/// is never observed.
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
