//! Heartbeat consumer behaviour.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;
use vidflow_api::engine::heartbeats::{process_heartbeat, HeartbeatConsumer, HeartbeatOutcome};
use vidflow_api::engine::lifecycle;
use vidflow_bus::{send, HeartbeatEvent, MemoryBus};
use vidflow_core::lifecycle::{JobAction, JobStatus};
use vidflow_core::types::JobId;
use vidflow_db::repositories::{HeartbeatRepo, JobRepo};

async fn job_in(pool: &PgPool, status: JobStatus) -> JobId {
    let job = lifecycle::create_job(pool, "videos/hb").await.unwrap();
    sqlx::query("UPDATE jobs SET status = $2 WHERE id = $1")
        .bind(job.id)
        .bind(status.as_str())
        .execute(pool)
        .await
        .unwrap();
    job.id
}

async fn status_of(pool: &PgPool, id: JobId) -> JobStatus {
    JobRepo::find_by_id(pool, id).await.unwrap().unwrap().status
}

fn heartbeat(job_id: JobId, action: JobAction, unit_index: i64) -> HeartbeatEvent {
    HeartbeatEvent {
        job_id,
        action,
        unit_index,
        timestamp: Utc::now(),
    }
}

async fn deliver(pool: &PgPool, event: &HeartbeatEvent) -> HeartbeatOutcome {
    let bus = MemoryBus::new();
    send(&bus, event).await.unwrap();
    process_heartbeat(pool, &bus.published()[0]).await.unwrap()
}

// ---- Test: start heartbeat activates a starting job ----

#[sqlx::test(migrations = "../../db/migrations")]
async fn start_heartbeat_activates_job(pool: PgPool) {
    let id = job_in(&pool, JobStatus::InStartupProcessing).await;

    let outcome = deliver(&pool, &heartbeat(id, JobAction::Start, 0)).await;
    assert_eq!(outcome, HeartbeatOutcome::Advanced(id, JobStatus::Active));
    assert_eq!(status_of(&pool, id).await, JobStatus::Active);

    let latest = HeartbeatRepo::latest_for_job(&pool, id).await.unwrap().unwrap();
    assert_eq!(latest.unit_index, 0);
}

// ---- Test: stop heartbeat deactivates from either allowed status ----

#[sqlx::test(migrations = "../../db/migrations")]
async fn stop_heartbeat_deactivates_job(pool: PgPool) {
    for from in [JobStatus::InShutdownProcessing, JobStatus::Active] {
        let id = job_in(&pool, from).await;
        let outcome = deliver(&pool, &heartbeat(id, JobAction::Stop, 12)).await;
        assert_eq!(outcome, HeartbeatOutcome::Advanced(id, JobStatus::Inactive));
    }
}

// ---- Test: out-of-order heartbeats are recorded without effect ----

#[sqlx::test(migrations = "../../db/migrations")]
async fn stale_start_heartbeat_does_not_reactivate(pool: PgPool) {
    let id = job_in(&pool, JobStatus::InitShutdown).await;

    let outcome = deliver(&pool, &heartbeat(id, JobAction::Start, 40)).await;
    assert_eq!(outcome, HeartbeatOutcome::Recorded(id));
    assert_eq!(status_of(&pool, id).await, JobStatus::InitShutdown);
    assert!(HeartbeatRepo::latest_for_job(&pool, id).await.unwrap().is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn duplicate_heartbeat_is_idempotent(pool: PgPool) {
    let id = job_in(&pool, JobStatus::InStartupProcessing).await;
    let event = heartbeat(id, JobAction::Start, 3);

    deliver(&pool, &event).await;
    let again = deliver(&pool, &event).await;
    assert_eq!(again, HeartbeatOutcome::Recorded(id));
    assert_eq!(status_of(&pool, id).await, JobStatus::Active);
}

// ---- Test: unknown jobs and garbage payloads ----

#[sqlx::test(migrations = "../../db/migrations")]
async fn heartbeat_for_unknown_job_is_recorded(pool: PgPool) {
    let id = Uuid::new_v4();
    let outcome = deliver(&pool, &heartbeat(id, JobAction::Start, 0)).await;
    assert_eq!(outcome, HeartbeatOutcome::UnknownJob(id));
    assert!(HeartbeatRepo::latest_for_job(&pool, id).await.unwrap().is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn consumer_acks_malformed_payloads(pool: PgPool) {
    let bus = MemoryBus::new();
    let bad = bus.push_raw("x", "{not json");
    let id = job_in(&pool, JobStatus::InStartupProcessing).await;
    send(&bus, &heartbeat(id, JobAction::Start, 0)).await.unwrap();

    let mut consumer = HeartbeatConsumer::new(pool.clone(), bus.subscriber());
    assert_eq!(consumer.consume_batch().await.unwrap(), 2);

    assert!(bus.acked().contains(&bad.id));
    assert_eq!(bus.pending_count(), 0);
    assert_eq!(status_of(&pool, id).await, JobStatus::Active);
}

// ---- Test: database failure leaves the delivery for redelivery ----

#[sqlx::test(migrations = "../../db/migrations")]
async fn database_failure_leaves_delivery_unacked(pool: PgPool) {
    let bus = MemoryBus::new();
    send(&bus, &heartbeat(Uuid::new_v4(), JobAction::Start, 0))
        .await
        .unwrap();

    let mut consumer = HeartbeatConsumer::new(pool.clone(), bus.subscriber());
    pool.close().await;

    assert!(consumer.consume_batch().await.is_err());
    assert!(bus.acked().is_empty());
    assert_eq!(bus.pending_count(), 1);
}
