//! Handlers for single-task operations.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use renderq_core::codec::ParamValue;
use renderq_db::models::task::Task;
use renderq_worker::control::{MoveTarget, ResultImage, TaskUpdate};
use renderq_worker::ExecuteNow;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// A task with its current queue position (`null` unless Pending).
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub position: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    pub position: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PriorityResponse {
    pub priority: i64,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub status: ExecuteNow,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    /// Whether the task was running and got an interrupt.
    pub interrupted: bool,
}

/// Request body for PUT /tasks/{id}.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateTaskRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 512))]
    pub checkpoint: Option<String>,
    /// Named parameters to set, keyed by dot path.
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

/// Request body for POST /tasks/{id}/rename.
#[derive(Debug, Deserialize, Validate)]
pub struct RenameRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultsParams {
    #[serde(default)]
    pub zip: bool,
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = state.queue.get(&id).await?;
    let position = state.queue.position(&id).await?;
    Ok(Json(DataResponse {
        data: TaskView { task, position },
    }))
}

/// GET /api/v1/tasks/{id}/position
pub async fn get_position(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let position = state.queue.position(&id).await?;
    Ok(Json(DataResponse {
        data: PositionResponse { position },
    }))
}

/// GET /api/v1/tasks/{id}/results
///
/// Images of a Done task with their infotexts, or with `?zip=true` a zip
/// archive of the image files.
pub async fn get_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ResultsParams>,
) -> AppResult<Response> {
    let images = state.queue.results(&id).await?;
    if !params.zip {
        return Ok(Json(DataResponse { data: images }).into_response());
    }

    let archive = tokio::task::spawn_blocking(move || write_archive(&images))
        .await
        .map_err(|e| AppError::InternalError(format!("Archive task failed: {e}")))??;

    Response::builder()
        .header(CONTENT_TYPE, "application/zip")
        .header(CONTENT_DISPOSITION, format!("attachment; filename=\"{id}.zip\""))
        .body(Body::from(archive))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

/// Zip the image files, each followed by its infotext. Missing files are
/// skipped.
fn write_archive(images: &[ResultImage]) -> AppResult<Vec<u8>> {
    let zip_err = |e: zip::result::ZipError| AppError::InternalError(format!("Zip error: {e}"));
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (index, image) in images.iter().enumerate() {
        let path = FsPath::new(&image.path);
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %image.path, error = %e, "Result image missing, skipped from archive");
                continue;
            }
        };
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image.png");
        let entry = format!("{index:02}-{file_name}");

        writer.start_file(entry.as_str(), options).map_err(zip_err)?;
        writer
            .write_all(&bytes)
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        if !image.infotext.is_empty() {
            writer.start_file(format!("{entry}.txt"), options).map_err(zip_err)?;
            writer
                .write_all(image.infotext.as_bytes())
                .map_err(|e| AppError::InternalError(e.to_string()))?;
        }
    }

    Ok(writer.finish().map_err(zip_err)?.into_inner())
}

// ---------------------------------------------------------------------------
// Edit
// ---------------------------------------------------------------------------

/// PUT /api/v1/tasks/{id}
///
/// Rejected with 409 while the task is running.
pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateTaskRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let params = input
        .params
        .iter()
        .map(|(path, value)| Ok((path.clone(), ParamValue::from_json(value)?)))
        .collect::<AppResult<BTreeMap<_, _>>>()?;

    let task = state
        .queue
        .update(
            &id,
            TaskUpdate {
                name: input.name,
                checkpoint: input.checkpoint,
                params,
            },
        )
        .await?;
    Ok(Json(DataResponse { data: task }))
}

/// POST /api/v1/tasks/{id}/rename
pub async fn rename_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<RenameRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    state.queue.rename(&id, &input.name).await?;
    Ok(Json(DataResponse {
        data: state.queue.get(&id).await?,
    }))
}

/// POST /api/v1/tasks/{id}/bookmark
pub async fn bookmark_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    set_bookmark(state, id, true).await
}

/// POST /api/v1/tasks/{id}/unbookmark
pub async fn unbookmark_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    set_bookmark(state, id, false).await
}

async fn set_bookmark(state: AppState, id: String, bookmarked: bool) -> AppResult<impl IntoResponse> {
    state.queue.set_bookmarked(&id, bookmarked).await?;
    Ok(Json(DataResponse {
        data: state.queue.get(&id).await?,
    }))
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks/{id}/run
///
/// Runs the task now if nothing is rendering, otherwise moves it to the top.
pub async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let status = state.runner().execute_now(&id).await?;
    Ok(Json(DataResponse {
        data: RunResponse { status },
    }))
}

/// POST /api/v1/tasks/{id}/requeue
///
/// Copies the task as a new Pending task.
pub async fn requeue_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let copy = state.queue.requeue(&id).await?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(DataResponse { data: copy }),
    ))
}

/// POST /api/v1/tasks/{id}/retry
pub async fn retry_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.queue.retry(&id).await?;
    Ok(Json(DataResponse {
        data: state.queue.get(&id).await?,
    }))
}

/// POST /api/v1/tasks/{id}/move/top
pub async fn move_top(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    reprioritize(state, id, MoveTarget::Top).await
}

/// POST /api/v1/tasks/{id}/move/bottom
pub async fn move_bottom(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    reprioritize(state, id, MoveTarget::Bottom).await
}

/// POST /api/v1/tasks/{id}/move/over/{other_id}
///
/// Takes `other_id`'s priority; `other_id` and everything behind it shift
/// back by one.
pub async fn move_over(
    State(state): State<AppState>,
    Path((id, other_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    reprioritize(state, id, MoveTarget::Over(other_id)).await
}

async fn reprioritize(state: AppState, id: String, target: MoveTarget) -> AppResult<impl IntoResponse> {
    let priority = state.queue.reprioritize(&id, target).await?;
    Ok(Json(DataResponse {
        data: PriorityResponse { priority },
    }))
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// DELETE /api/v1/tasks/{id}
///
/// A running task is interrupted before its row is removed.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let interrupted = state.queue.delete(&id).await?;
    Ok(Json(DataResponse {
        data: DeleteResponse { interrupted },
    }))
}
