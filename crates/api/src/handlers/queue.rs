//! Handlers for the pending queue: submission, listing, export/import and
//! worker control.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use renderq_core::codec::{Origin, Overrides, ParamValue, TaskArgs};
use renderq_core::task::TaskKind;
use renderq_core::types::TaskId;
use renderq_db::models::task::Page;
use renderq_worker::control::ExportedTask;
use renderq_worker::TaskSubmission;

use crate::error::{AppError, AppResult};
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Request body for POST /queue/txt2img and /queue/img2img.
#[derive(Debug, Deserialize, Validate)]
pub struct EnqueueRequest {
    /// Named render parameters.
    pub args: serde_json::Map<String, serde_json::Value>,
    #[validate(length(min = 1, max = 512))]
    pub checkpoint: Option<String>,
    #[validate(length(min = 1, max = 512))]
    pub vae: Option<String>,
    /// Where to POST the outcome once the task finishes.
    #[validate(url)]
    pub callback_url: Option<String>,
    /// Object-storage destination for result images.
    pub upload_config: Option<serde_json::Value>,
    #[validate(length(min = 1, max = 256))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 256))]
    pub external_id: Option<String>,
    #[validate(length(min = 1, max = 256))]
    pub script_id: Option<String>,
    /// Positional arguments of `script_id`.
    #[serde(default)]
    pub script_args: Vec<serde_json::Value>,
    pub priority: Option<i64>,
}

impl EnqueueRequest {
    fn into_submission(self, kind: TaskKind) -> AppResult<TaskSubmission> {
        let named = match ParamValue::from_json(&serde_json::Value::Object(self.args))? {
            ParamValue::Map(named) => named,
            _ => return Err(AppError::BadRequest("args must be an object of named parameters".into())),
        };
        let positional = self
            .script_args
            .iter()
            .map(ParamValue::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        let mut args = TaskArgs::new(kind, Origin::Api);
        args.named = named;
        args.positional = positional;
        args.overrides = Overrides {
            checkpoint: self.checkpoint,
            vae: self.vae,
        };
        args.script_id = self.script_id;

        let mut submission = TaskSubmission::new(args);
        submission.priority = self.priority;
        submission.display_name = self.name;
        submission.external_id = self.external_id;
        submission.external_callback = self.callback_url;
        submission.upload_config = self.upload_config;
        Ok(submission)
    }
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Serialize)]
pub struct PausedResponse {
    pub paused: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// POST /api/v1/queue/txt2img
pub async fn enqueue_txt2img(
    State(state): State<AppState>,
    Json(input): Json<EnqueueRequest>,
) -> AppResult<impl IntoResponse> {
    enqueue(state, input, TaskKind::GenerateFromText).await
}

/// POST /api/v1/queue/img2img
pub async fn enqueue_img2img(
    State(state): State<AppState>,
    Json(input): Json<EnqueueRequest>,
) -> AppResult<impl IntoResponse> {
    enqueue(state, input, TaskKind::GenerateFromImage).await
}

async fn enqueue(
    state: AppState,
    input: EnqueueRequest,
    kind: TaskKind,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let task = state.runner().register(input.into_submission(kind)?).await?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: EnqueueResponse { task_id: task.id },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// GET /api/v1/queue
///
/// Running task first, then Pending tasks in dequeue order.
pub async fn get_queue(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.queue.queue(params.page()).await?;
    Ok(Json(DataResponse { data: snapshot }))
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

/// GET /api/v1/queue/export
pub async fn export_queue(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let tasks = state.queue.export(Page::default()).await?;
    Ok(Json(DataResponse { data: tasks }))
}

/// POST /api/v1/queue/import
///
/// Upserts by id; entries are validated before anything is written.
pub async fn import_queue(
    State(state): State<AppState>,
    Json(entries): Json<Vec<ExportedTask>>,
) -> AppResult<impl IntoResponse> {
    let imported = state.queue.import(entries).await?;
    Ok(Json(DataResponse {
        data: CountResponse {
            count: imported as u64,
        },
    }))
}

// ---------------------------------------------------------------------------
// Worker control
// ---------------------------------------------------------------------------

/// POST /api/v1/queue/pause
pub async fn pause_queue(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.runner().pause().await?;
    Ok(Json(DataResponse {
        data: PausedResponse { paused: true },
    }))
}

/// POST /api/v1/queue/resume
pub async fn resume_queue(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.runner().resume().await?;
    Ok(Json(DataResponse {
        data: PausedResponse { paused: false },
    }))
}

/// POST /api/v1/queue/clear
///
/// Deletes every non-bookmarked Pending task.
pub async fn clear_queue(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let count = state.queue.clear_queue().await?;
    Ok(Json(DataResponse {
        data: CountResponse { count },
    }))
}

/// POST /api/v1/queue/retry-failed
pub async fn retry_failed(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let count = state.queue.retry_all_failed().await?;
    Ok(Json(DataResponse {
        data: CountResponse { count },
    }))
}
