#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use renderq_api::config::ServerConfig;
use renderq_api::router::build_app_router;
use renderq_api::state::AppState;
use renderq_core::codec::{ScriptRegistry, TaskArgs};
use renderq_db::DbPool;
use renderq_engine::{GenInfo, RenderContext, RenderEngine, RenderError};
use renderq_events::TaskHooks;
use renderq_worker::config::RunnerConfig;
use renderq_worker::control::QueueService;
use renderq_worker::TaskRunner;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:7860".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        database_url: "sqlite::memory:".to_string(),
        max_body_bytes: 1024 * 1024,
    }
}

/// Engine that succeeds immediately without producing images.
pub struct NoopEngine;

#[async_trait]
impl RenderEngine for NoopEngine {
    async fn render(&self, _ctx: RenderContext, _args: TaskArgs) -> Result<GenInfo, RenderError> {
        Ok(GenInfo::default())
    }

    async fn interrupt(&self) {}
}

/// The full application over an in-memory store.
///
/// The worker loop is not spawned, so submitted tasks stay Pending unless a
/// test moves them on through the store.
pub struct TestApp {
    pub app: Router,
    pub pool: DbPool,
    pub runner: Arc<TaskRunner>,
    shutdown: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub async fn build_test_app() -> TestApp {
    let pool = renderq_db::create_memory_pool().await.unwrap();
    renderq_db::run_migrations(&pool).await.unwrap();

    let shutdown = CancellationToken::new();
    let runner = TaskRunner::start(
        pool.clone(),
        Arc::new(NoopEngine),
        TaskHooks::default(),
        RunnerConfig::default(),
        shutdown.clone(),
    )
    .await
    .unwrap();

    let config = test_config();
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        queue: QueueService::new(runner.clone(), Arc::new(ScriptRegistry::new())),
    };

    TestApp {
        app: build_app_router(state, &config),
        pool,
        runner,
        shutdown,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri, None).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn put_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::PUT, uri, Some(body)).await
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, None).await
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Submit a text-to-image task and return its id.
pub async fn enqueue(app: &Router, prompt: &str) -> String {
    let response = post_json(
        app,
        "/api/v1/queue/txt2img",
        serde_json::json!({ "args": { "prompt": prompt, "steps": 20 } }),
    )
    .await;
    assert_eq!(response.status(), 201);
    body_json(response).await["data"]["task_id"]
        .as_str()
        .unwrap()
        .to_string()
}
