use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use renderq_core::types::TaskId;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the task store is unreachable.
    pub status: &'static str,
    pub version: &'static str,
    pub db_healthy: bool,
    /// Whether the worker is held by a pause (manual or after running out
    /// of device memory).
    pub paused: bool,
    pub running_task: Option<TaskId>,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = renderq_db::health_check(&state.pool).await.is_ok();
    let runner = state.runner();

    Json(HealthResponse {
        status: if db_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        paused: runner.is_paused(),
        running_task: runner.current_task_id().await,
    })
}

/// Mounted both at the root and under `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
