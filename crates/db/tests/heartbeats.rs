//! Integration tests for heartbeat persistence and stall detection.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use vidflow_core::lifecycle::{JobAction, JobStatus};
use vidflow_db::models::heartbeat::NewHeartbeat;
use vidflow_db::repositories::{HeartbeatRepo, JobRepo};

async fn active_job(pool: &PgPool, source_ref: &str) -> uuid::Uuid {
    let job = JobRepo::create_with_start(pool, source_ref).await.unwrap();
    JobRepo::advance_status(pool, job.id, &[JobStatus::InitStartup], JobStatus::Active)
        .await
        .unwrap();
    job.id
}

fn beat(job_id: uuid::Uuid, unit_index: i64, age_secs: i64) -> NewHeartbeat {
    NewHeartbeat {
        job_id,
        action: JobAction::Start,
        unit_index,
        timestamp: Utc::now() - Duration::seconds(age_secs),
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn latest_for_job_returns_newest_timestamp(pool: PgPool) {
    let id = active_job(&pool, "frames/a").await;
    HeartbeatRepo::insert(&pool, &beat(id, 3, 5)).await.unwrap();
    HeartbeatRepo::insert(&pool, &beat(id, 1, 50)).await.unwrap();

    let latest = HeartbeatRepo::latest_for_job(&pool, id).await.unwrap().unwrap();
    assert_eq!(latest.unit_index, 3);
    assert_eq!(latest.action, JobAction::Start);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn heartbeat_for_unknown_job_is_still_recorded(pool: PgPool) {
    let unknown = uuid::Uuid::new_v4();
    HeartbeatRepo::insert(&pool, &beat(unknown, 0, 0)).await.unwrap();
    assert!(HeartbeatRepo::latest_for_job(&pool, unknown)
        .await
        .unwrap()
        .is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn find_stalled_reports_silent_and_stale_active_jobs(pool: PgPool) {
    let silent = active_job(&pool, "frames/silent").await;
    let stale = active_job(&pool, "frames/stale").await;
    let fresh = active_job(&pool, "frames/fresh").await;
    let starting = JobRepo::create_with_start(&pool, "frames/starting").await.unwrap();

    HeartbeatRepo::insert(&pool, &beat(stale, 4, 120)).await.unwrap();
    HeartbeatRepo::insert(&pool, &beat(fresh, 4, 120)).await.unwrap();
    HeartbeatRepo::insert(&pool, &beat(fresh, 9, 2)).await.unwrap();

    let cutoff = Utc::now() - Duration::seconds(30);
    let stalled = HeartbeatRepo::find_stalled(&pool, cutoff).await.unwrap();
    let ids: Vec<_> = stalled.iter().map(|s| s.job_id).collect();

    assert!(ids.contains(&silent));
    assert!(ids.contains(&stale));
    assert!(!ids.contains(&fresh));
    assert!(!ids.contains(&starting.id), "only active jobs are watched");

    let silent_row = stalled.iter().find(|s| s.job_id == silent).unwrap();
    assert!(silent_row.last_heartbeat.is_none());
}
