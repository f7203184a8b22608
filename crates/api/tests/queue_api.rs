//! Integration tests for queue, task and history endpoints.

mod common;

use std::io::Cursor;

use axum::http::StatusCode;
use common::{
    body_bytes, body_json, build_test_app, delete, enqueue, get, post, post_json, put_json,
};
use renderq_core::task::TaskStatus;
use renderq_db::repositories::TaskRepo;
use serde_json::json;

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_returns_id_and_task_is_pending_at_front() {
    let t = build_test_app().await;
    let id = enqueue(&t.app, "a red fox").await;

    let response = get(&t.app, &format!("/api/v1/tasks/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["id"], id.as_str());
    assert_eq!(json["data"]["status"], "pending");
    assert_eq!(json["data"]["position"], 0);
}

#[tokio::test]
async fn enqueue_rejects_invalid_callback_url() {
    let t = build_test_app().await;
    let response = post_json(
        &t.app,
        "/api/v1/queue/txt2img",
        json!({ "args": { "prompt": "x" }, "callback_url": "not a url" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn enqueue_keeps_callback_and_name() {
    let t = build_test_app().await;
    let response = post_json(
        &t.app,
        "/api/v1/queue/img2img",
        json!({
            "args": { "prompt": "x", "denoising_strength": 0.4 },
            "callback_url": "http://hooks.local/done",
            "name": "Portrait",
            "external_id": "job-7",
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["data"]["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let task = TaskRepo::require(&t.pool, &id).await.unwrap();
    assert_eq!(task.external_callback.as_deref(), Some("http://hooks.local/done"));
    assert_eq!(task.display_name.as_deref(), Some("Portrait"));
    assert_eq!(task.external_id.as_deref(), Some("job-7"));
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_task_returns_404_with_code() {
    let t = build_test_app().await;
    let response = get(&t.app, "/api/v1/tasks/nope").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert!(json["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn unknown_history_status_is_rejected() {
    let t = build_test_app().await;
    let response = get(&t.app, "/api/v1/history?status=running").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn update_of_running_task_conflicts() {
    let t = build_test_app().await;
    let id = enqueue(&t.app, "x").await;
    TaskRepo::set_status(&t.pool, &id, TaskStatus::Running, None)
        .await
        .unwrap();

    let response = put_json(&t.app, &format!("/api/v1/tasks/{id}"), json!({ "name": "new" })).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "ALREADY_RUNNING");

    let response = post(&t.app, &format!("/api/v1/tasks/{id}/run")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// Queue control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pause_and_resume_are_reflected_in_queue_listing() {
    let t = build_test_app().await;
    enqueue(&t.app, "a").await;
    enqueue(&t.app, "b").await;

    let response = post(&t.app, "/api/v1/queue/pause").await;
    assert_eq!(body_json(response).await["data"]["paused"], true);

    let json = body_json(get(&t.app, "/api/v1/queue").await).await;
    assert_eq!(json["data"]["paused"], true);
    assert_eq!(json["data"]["total_pending"], 2);
    assert_eq!(json["data"]["tasks"].as_array().unwrap().len(), 2);

    post(&t.app, "/api/v1/queue/resume").await;
    assert!(!t.runner.is_paused());
}

#[tokio::test]
async fn move_over_and_position() {
    let t = build_test_app().await;
    let a = enqueue(&t.app, "a").await;
    let b = enqueue(&t.app, "b").await;

    let response = post(&t.app, &format!("/api/v1/tasks/{b}/move/over/{a}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let position = |id: String| {
        let app = t.app.clone();
        async move {
            body_json(get(&app, &format!("/api/v1/tasks/{id}/position")).await).await["data"]
                ["position"]
                .clone()
        }
    };
    assert_eq!(position(b.clone()).await, 0);
    assert_eq!(position(a.clone()).await, 1);

    post(&t.app, &format!("/api/v1/tasks/{a}/move/top")).await;
    assert_eq!(position(a).await, 0);
    assert_eq!(position(b).await, 1);
}

#[tokio::test]
async fn update_rename_and_bookmark() {
    let t = build_test_app().await;
    let id = enqueue(&t.app, "x").await;

    let response = put_json(
        &t.app,
        &format!("/api/v1/tasks/{id}"),
        json!({ "checkpoint": "v2.safetensors", "params": { "steps": 40 } }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = post_json(&t.app, &format!("/api/v1/tasks/{id}/rename"), json!({ "name": "" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_json(
        &t.app,
        &format!("/api/v1/tasks/{id}/rename"),
        json!({ "name": "Final" }),
    )
    .await;
    assert_eq!(body_json(response).await["data"]["display_name"], "Final");

    let response = post(&t.app, &format!("/api/v1/tasks/{id}/bookmark")).await;
    assert_eq!(body_json(response).await["data"]["bookmarked"], true);
}

#[tokio::test]
async fn delete_and_clear_queue() {
    let t = build_test_app().await;
    let a = enqueue(&t.app, "a").await;
    enqueue(&t.app, "b").await;
    enqueue(&t.app, "c").await;

    let response = delete(&t.app, &format!("/api/v1/tasks/{a}")).await;
    assert_eq!(body_json(response).await["data"]["interrupted"], false);
    assert_eq!(get(&t.app, &format!("/api/v1/tasks/{a}")).await.status(), StatusCode::NOT_FOUND);

    let response = post(&t.app, "/api/v1/queue/clear").await;
    assert_eq!(body_json(response).await["data"]["count"], 2);
}

// ---------------------------------------------------------------------------
// History, retries and results
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_tasks_show_in_history_and_can_be_retried() {
    let t = build_test_app().await;
    let a = enqueue(&t.app, "a").await;
    let b = enqueue(&t.app, "b").await;
    for id in [&a, &b] {
        TaskRepo::set_status(&t.pool, id, TaskStatus::Failed, Some("boom"))
            .await
            .unwrap();
    }

    let json = body_json(get(&t.app, "/api/v1/history?status=failed").await).await;
    assert_eq!(json["data"]["total"], 2);
    assert_eq!(json["data"]["tasks"][0]["result"], "boom");

    let response = post(&t.app, &format!("/api/v1/tasks/{a}/retry")).await;
    assert_eq!(body_json(response).await["data"]["status"], "pending");

    let response = post(&t.app, "/api/v1/queue/retry-failed").await;
    assert_eq!(body_json(response).await["data"]["count"], 1);
}

#[tokio::test]
async fn requeue_creates_copy() {
    let t = build_test_app().await;
    let id = enqueue(&t.app, "a").await;

    let response = post(&t.app, &format!("/api/v1/tasks/{id}/requeue")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_ne!(json["data"]["id"], id.as_str());
    assert_eq!(json["data"]["display_name"], format!("Copy of {id}"));
}

#[tokio::test]
async fn results_require_done_task_and_zip_on_request() {
    let t = build_test_app().await;
    let id = enqueue(&t.app, "a").await;

    let response = get(&t.app, &format!("/api/v1/tasks/{id}/results")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("out-1.png");
    std::fs::write(&image, b"png bytes").unwrap();
    let result = json!({
        "images": [image.to_str().unwrap(), dir.path().join("gone.png").to_str().unwrap()],
        "infotexts": ["seed 1", "seed 2"],
    });
    TaskRepo::set_status(&t.pool, &id, TaskStatus::Done, Some(&result.to_string()))
        .await
        .unwrap();

    let json = body_json(get(&t.app, &format!("/api/v1/tasks/{id}/results")).await).await;
    assert_eq!(json["data"][0]["infotext"], "seed 1");
    assert_eq!(json["data"].as_array().unwrap().len(), 2);

    let response = get(&t.app, &format!("/api/v1/tasks/{id}/results?zip=true")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/zip");

    let archive = zip::ZipArchive::new(Cursor::new(body_bytes(response).await)).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"00-out-1.png"));
    assert!(names.contains(&"00-out-1.png.txt"));
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

#[tokio::test]
async fn export_then_import_into_fresh_app() {
    let source = build_test_app().await;
    let id = enqueue(&source.app, "lighthouse").await;
    let exported = body_json(get(&source.app, "/api/v1/queue/export").await).await["data"].clone();
    assert_eq!(exported[0]["id"], id.as_str());
    assert_eq!(exported[0]["type"], "txt2img");

    let target = build_test_app().await;
    let response = post_json(&target.app, "/api/v1/queue/import", exported).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["count"], 1);

    let task = TaskRepo::require(&target.pool, &id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn import_with_bad_blob_is_rejected() {
    let t = build_test_app().await;
    let response = post_json(
        &t.app,
        "/api/v1/queue/import",
        json!([{
            "id": "x1",
            "type": "txt2img",
            "params": { "args": {}, "is_ui": false, "is_img2img": false },
            "script_params": "***",
        }]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(TaskRepo::get(&t.pool, "x1").await.unwrap().is_none());
}
