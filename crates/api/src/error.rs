use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use renderq_core::codec::CodecError;
use renderq_core::error::CoreError;
use renderq_db::DbError;
use renderq_worker::RunnerError;

/// Application-level error type for HTTP handlers.
///
/// Wraps the runner's error for queue operations and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce `{error, code}` bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Any failure surfaced by the runner or the queue service.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Runner(RunnerError::Core(err))
    }
}

impl From<CodecError> for AppError {
    fn from(err: CodecError) -> Self {
        AppError::Runner(RunnerError::Codec(err))
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        AppError::Runner(RunnerError::Store(err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Runner(err) => classify_runner_error(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

/// Map a runner error to an HTTP status, error code and message.
fn classify_runner_error(err: &RunnerError) -> (StatusCode, &'static str, String) {
    match err {
        RunnerError::Store(DbError::NotFound(id)) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Task with id {id} not found"),
        ),
        RunnerError::Store(DbError::DuplicateId(id)) => (
            StatusCode::CONFLICT,
            "DUPLICATE_ID",
            format!("Task with id {id} already exists"),
        ),
        RunnerError::Store(DbError::Unavailable(e)) => {
            tracing::error!(error = %e, "Task store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                "The task store is unavailable".to_string(),
            )
        }
        RunnerError::AlreadyRunning(id) => (
            StatusCode::CONFLICT,
            "ALREADY_RUNNING",
            format!("Task {id} is running"),
        ),
        RunnerError::Codec(CodecError::Io(e)) => {
            tracing::error!(error = %e, "Parameter compression failed");
            internal()
        }
        RunnerError::Codec(e) => (StatusCode::BAD_REQUEST, "INVALID_PARAMS", e.to_string()),
        RunnerError::Core(core) => match core {
            CoreError::NotFound { entity, id } => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{entity} with id {id} not found"),
            ),
            CoreError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            CoreError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal core error");
                internal()
            }
        },
    }
}
