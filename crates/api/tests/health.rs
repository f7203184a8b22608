//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{body_json, build_test_app, get, post_json};
use tower::ServiceExt;

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let t = build_test_app().await;

    for uri in ["/health", "/api/v1/health"] {
        let response = get(&t.app, uri).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert_eq!(json["db_healthy"], true);
        assert_eq!(json["paused"], false);
        assert!(json["running_task"].is_null());
    }
}

#[tokio::test]
async fn health_reports_paused_worker() {
    let t = build_test_app().await;
    t.runner.pause().await.unwrap();

    let json = body_json(get(&t.app, "/health").await).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["paused"], true);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let t = build_test_app().await;
    let prompt = "x".repeat(2 * 1024 * 1024);
    let response = post_json(
        &t.app,
        "/api/v1/queue/txt2img",
        serde_json::json!({ "args": { "prompt": prompt } }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let t = build_test_app().await;
    let response = get(&t.app, "/this-route-does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let t = build_test_app().await;
    let response = get(&t.app, "/health").await;

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("Response must contain an x-request-id header");
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() {
    let t = build_test_app().await;

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/v1/queue")
        .header("Origin", "http://localhost:7860")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .body(Body::empty())
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let allow_origin = response
        .headers()
        .get("access-control-allow-origin")
        .expect("Missing Access-Control-Allow-Origin header");
    assert_eq!(allow_origin, "http://localhost:7860");
}
