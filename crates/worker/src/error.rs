use renderq_core::codec::CodecError;
use renderq_core::error::CoreError;
use renderq_core::types::TaskId;
use renderq_db::DbError;

/// Failures of runner and queue control operations.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] DbError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// The operation needs the task out of the render slot.
    #[error("Task {0} is running")]
    AlreadyRunning(TaskId),
}
