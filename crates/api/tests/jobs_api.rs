//! HTTP-level tests for the `/api/v1/jobs` endpoints.

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use common::{body_json, get, post_json};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;
use vidflow_core::detection::{Detection, UnitResult};
use vidflow_core::lifecycle::JobAction;
use vidflow_db::models::heartbeat::NewHeartbeat;
use vidflow_db::repositories::{HeartbeatRepo, OutboxRepo};
use vidflow_storage::MemoryStore;

async fn create(pool: &PgPool, source_ref: &str) -> serde_json::Value {
    let app = common::build_test_app(pool.clone());
    let response = post_json(app, "/api/v1/jobs", json!({ "source_ref": source_ref })).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["data"].clone()
}

async fn act(pool: &PgPool, id: &str, action: &str) -> axum::response::Response {
    let app = common::build_test_app(pool.clone());
    post_json(
        app,
        &format!("/api/v1/jobs/{id}/actions"),
        json!({ "action": action }),
    )
    .await
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn create_job_returns_201_in_init_startup(pool: PgPool) {
    let job = create(&pool, "videos/a.mp4").await;

    assert_eq!(job["status"], "init_startup");
    assert_eq!(job["source_ref"], "videos/a.mp4");

    let id: Uuid = job["id"].as_str().unwrap().parse().unwrap();
    let outbox = OutboxRepo::list_for_job(&pool, id).await.unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].action, JobAction::Start);
    assert!(outbox[0].processed_at.is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn create_job_rejects_source_without_bucket(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = post_json(app, "/api/v1/jobs", json!({ "source_ref": "nobucket" })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn create_job_rejects_missing_field(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = post_json(app, "/api/v1/jobs", json!({})).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn get_job_by_id(pool: PgPool) {
    let job = create(&pool, "videos/b").await;
    let id = job["id"].as_str().unwrap();

    let app = common::build_test_app(pool);
    let response = get(app, &format!("/api/v1/jobs/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["id"], id);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn get_unknown_job_returns_404(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = get(app, &format!("/api/v1/jobs/{}", Uuid::new_v4())).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn list_jobs_filters_by_status(pool: PgPool) {
    let first = create(&pool, "videos/one").await;
    create(&pool, "videos/two").await;
    let id = first["id"].as_str().unwrap();
    assert_eq!(act(&pool, id, "stop").await.status(), StatusCode::OK);

    let app = common::build_test_app(pool.clone());
    let all = body_json(get(app, "/api/v1/jobs").await).await;
    assert_eq!(all["data"].as_array().unwrap().len(), 2);

    let app = common::build_test_app(pool.clone());
    let stopping = body_json(get(app, "/api/v1/jobs?status=init_shutdown").await).await;
    let stopping = stopping["data"].as_array().unwrap();
    assert_eq!(stopping.len(), 1);
    assert_eq!(stopping[0]["id"], id);

    let app = common::build_test_app(pool);
    let page = body_json(get(app, "/api/v1/jobs?limit=1&offset=1").await).await;
    assert_eq!(page["data"].as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn stop_before_dispatch_cancels_pending_start(pool: PgPool) {
    let job = create(&pool, "videos/c").await;
    let id = job["id"].as_str().unwrap();

    let response = act(&pool, id, "stop").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["status"], "init_shutdown");

    let pending = OutboxRepo::list_pending_for_job(&pool, id.parse().unwrap())
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].action, JobAction::Stop);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn racing_requests_serialize_on_the_job_row(pool: PgPool) {
    let job = create(&pool, "videos/race").await;
    let id = job["id"].as_str().unwrap();

    let (first, second) = tokio::join!(act(&pool, id, "stop"), act(&pool, id, "stop"));
    let mut statuses = vec![first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let all = OutboxRepo::list_for_job(&pool, id.parse().unwrap()).await.unwrap();
    assert_eq!(all.len(), 2, "one start plus exactly one stop");
    let pending = OutboxRepo::list_pending_for_job(&pool, id.parse().unwrap())
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].action, JobAction::Stop);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn repeated_start_is_rejected_with_409(pool: PgPool) {
    let job = create(&pool, "videos/d").await;
    let id = job["id"].as_str().unwrap();

    let response = act(&pool, id, "start").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_TRANSITION");

    let outbox = OutboxRepo::list_for_job(&pool, id.parse().unwrap()).await.unwrap();
    assert_eq!(outbox.len(), 1, "a rejected request must not queue anything");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn unknown_action_is_rejected(pool: PgPool) {
    let job = create(&pool, "videos/e").await;
    let id = job["id"].as_str().unwrap();
    let response = act(&pool, id, "pause").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn action_on_unknown_job_returns_404(pool: PgPool) {
    let response = act(&pool, &Uuid::new_v4().to_string(), "stop").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Progress and results
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn progress_is_null_until_a_heartbeat_arrives(pool: PgPool) {
    let job = create(&pool, "videos/f").await;
    let id = job["id"].as_str().unwrap();
    let uri = format!("/api/v1/jobs/{id}/progress");

    let app = common::build_test_app(pool.clone());
    assert!(body_json(get(app, &uri).await).await["data"].is_null());

    HeartbeatRepo::insert(
        &pool,
        &NewHeartbeat {
            job_id: id.parse().unwrap(),
            action: JobAction::Start,
            unit_index: 7,
            timestamp: Utc::now(),
        },
    )
    .await
    .unwrap();

    let app = common::build_test_app(pool);
    let json = body_json(get(app, &uri).await).await;
    assert_eq!(json["data"]["unit_index"], 7);
    assert_eq!(json["data"]["action"], "start");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn results_are_listed_newest_first(pool: PgPool) {
    let job = create(&pool, "videos/g").await;
    let id: Uuid = job["id"].as_str().unwrap().parse().unwrap();

    let store = MemoryStore::new();
    for unit_index in 0..3 {
        store.seed_result(UnitResult {
            job_id: id,
            unit_index,
            unit_key: format!("g/frame_{unit_index:05}.jpg"),
            detections: vec![Detection {
                class_name: "person".into(),
                score: 0.9,
                bbox: [0.0, 0.0, 10.0, 10.0],
            }],
            produced_at: Utc::now(),
        });
    }

    let app = common::build_test_app_with_results(pool, store);
    let response = get(app, &format!("/api/v1/jobs/{id}/results?limit=2")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["unit_index"], 2);
    assert_eq!(data[0]["detections"][0]["class"], "person");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn results_for_unknown_job_return_404(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = get(app, &format!("/api/v1/jobs/{}/results", Uuid::new_v4())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
