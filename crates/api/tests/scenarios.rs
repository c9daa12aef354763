//! End-to-end control-plane scenarios: API, dispatcher, heartbeat consumer
//! and watchdog wired to one database and an in-memory bus.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::Utc;
use common::{body_json, get, post_json};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;
use vidflow_api::background::watchdog;
use vidflow_api::engine::dispatcher::OutboxDispatcher;
use vidflow_api::engine::heartbeats::HeartbeatConsumer;
use vidflow_bus::{send, HeartbeatEvent, JobCommand, MemoryBus};
use vidflow_core::lifecycle::JobAction;
use vidflow_db::repositories::OutboxRepo;

struct Harness {
    pool: PgPool,
    commands: MemoryBus,
    heartbeats: MemoryBus,
}

impl Harness {
    fn new(pool: PgPool) -> Self {
        Self {
            pool,
            commands: MemoryBus::new(),
            heartbeats: MemoryBus::new(),
        }
    }

    async fn status(&self, id: Uuid) -> String {
        let app = common::build_test_app(self.pool.clone());
        let json = body_json(get(app, &format!("/api/v1/jobs/{id}")).await).await;
        json["data"]["status"].as_str().unwrap().to_string()
    }

    async fn dispatch(&self) {
        OutboxDispatcher::new(self.pool.clone(), Arc::new(self.commands.clone()))
            .dispatch_once()
            .await
            .unwrap();
    }

    async fn worker_heartbeat(&self, job_id: Uuid, action: JobAction, unit_index: i64) {
        let event = HeartbeatEvent {
            job_id,
            action,
            unit_index,
            timestamp: Utc::now(),
        };
        send(&self.heartbeats, &event).await.unwrap();
        let mut consumer = HeartbeatConsumer::new(self.pool.clone(), self.heartbeats.subscriber());
        consumer.consume_batch().await.unwrap();
    }
}

// ---- Scenario: create, dispatch, first heartbeat ----

#[sqlx::test(migrations = "../../db/migrations")]
async fn job_reaches_active(pool: PgPool) {
    let h = Harness::new(pool.clone());

    let app = common::build_test_app(pool.clone());
    let response = post_json(app, "/api/v1/jobs", json!({ "source_ref": "videos/a.mp4" })).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id: Uuid = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    assert_eq!(h.status(id).await, "init_startup");
    let outbox = OutboxRepo::list_for_job(&pool, id).await.unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].action, JobAction::Start);

    h.dispatch().await;
    assert_eq!(h.status(id).await, "in_startup_processing");
    assert!(OutboxRepo::list_for_job(&pool, id).await.unwrap()[0]
        .processed_at
        .is_some());

    h.worker_heartbeat(id, JobAction::Start, 0).await;
    assert_eq!(h.status(id).await, "active");
}

// ---- Scenario: stop an active job ----

#[sqlx::test(migrations = "../../db/migrations")]
async fn active_job_stops(pool: PgPool) {
    let h = Harness::new(pool.clone());
    let job = vidflow_api::engine::lifecycle::create_job(&pool, "videos/a.mp4")
        .await
        .unwrap();
    h.dispatch().await;
    h.worker_heartbeat(job.id, JobAction::Start, 0).await;
    assert_eq!(h.status(job.id).await, "active");

    let app = common::build_test_app(pool.clone());
    let response = post_json(
        app,
        &format!("/api/v1/jobs/{}/actions", job.id),
        json!({ "action": "stop" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.status(job.id).await, "init_shutdown");

    let pending = OutboxRepo::list_pending_for_job(&pool, job.id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].action, JobAction::Stop);

    h.dispatch().await;
    assert_eq!(h.status(job.id).await, "in_shutdown_processing");
    let last = h.commands.published_as::<JobCommand>().pop().unwrap();
    assert_eq!(last.action, JobAction::Stop);

    h.worker_heartbeat(job.id, JobAction::Stop, 42).await;
    assert_eq!(h.status(job.id).await, "inactive");
}

// ---- Scenario: worker dies while active ----

#[sqlx::test(migrations = "../../db/migrations")]
async fn silent_worker_triggers_restart(pool: PgPool) {
    let h = Harness::new(pool.clone());
    let job = vidflow_api::engine::lifecycle::create_job(&pool, "videos/a.mp4")
        .await
        .unwrap();
    h.dispatch().await;
    h.worker_heartbeat(job.id, JobAction::Start, 0).await;
    assert_eq!(h.status(job.id).await, "active");

    // The worker goes quiet for longer than the scan interval.
    let interval = Duration::from_millis(200);
    tokio::time::sleep(interval * 2).await;

    let restarted = watchdog::scan_once(&pool, interval).await.unwrap();
    assert_eq!(restarted, vec![job.id]);
    assert_eq!(h.status(job.id).await, "init_startup");

    let pending = OutboxRepo::list_pending_for_job(&pool, job.id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].action, JobAction::Start);
}
