//! Integration tests for the worker's local job mirror.

use sqlx::PgPool;
use uuid::Uuid;
use vidflow_core::lifecycle::JobAction;
use vidflow_db::repositories::LocalJobRepo;

#[sqlx::test(migrations = "../../db/worker_migrations")]
async fn upsert_overwrites_action_and_refreshes_timestamp(pool: PgPool) {
    let id = Uuid::new_v4();
    let first = LocalJobRepo::upsert(&pool, id, JobAction::Start, "frames/a")
        .await
        .unwrap();
    assert_eq!(first.action, JobAction::Start);

    let stopped = LocalJobRepo::upsert(&pool, id, JobAction::Stop, "frames/a")
        .await
        .unwrap();
    assert_eq!(stopped.action, JobAction::Stop);
    assert_eq!(stopped.created_at, first.created_at);
    assert!(stopped.updated_at >= first.updated_at);
}

#[sqlx::test(migrations = "../../db/worker_migrations")]
async fn touch_ignores_stop_flagged_records(pool: PgPool) {
    let running = Uuid::new_v4();
    let stopping = Uuid::new_v4();
    LocalJobRepo::upsert(&pool, running, JobAction::Start, "frames/a").await.unwrap();
    LocalJobRepo::upsert(&pool, stopping, JobAction::Stop, "frames/b").await.unwrap();

    assert!(LocalJobRepo::touch(&pool, running).await.unwrap());
    assert!(!LocalJobRepo::touch(&pool, stopping).await.unwrap());
    assert!(!LocalJobRepo::touch(&pool, Uuid::new_v4()).await.unwrap());
}

#[sqlx::test(migrations = "../../db/worker_migrations")]
async fn list_and_guarded_delete(pool: PgPool) {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    LocalJobRepo::upsert(&pool, a, JobAction::Start, "frames/a").await.unwrap();
    LocalJobRepo::upsert(&pool, b, JobAction::Stop, "frames/b").await.unwrap();

    let stops = LocalJobRepo::list_by_action(&pool, JobAction::Stop).await.unwrap();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].id, b);

    assert!(!LocalJobRepo::delete_with_action(&pool, a, JobAction::Stop).await.unwrap());
    assert!(LocalJobRepo::delete_with_action(&pool, b, JobAction::Stop).await.unwrap());
    assert!(LocalJobRepo::find_by_id(&pool, b).await.unwrap().is_none());
    assert!(LocalJobRepo::find_by_id(&pool, a).await.unwrap().is_some());
}
