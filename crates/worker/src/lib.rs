//! Single-worker render queue.
//!
//! - [`runner::TaskRunner`]: the one background loop that drains Pending
//!   tasks through the render engine, one at a time.
//! - [`control::QueueService`]: queue and history operations exposed to
//!   callers (requeue, bookmark, export/import, ...).
//! - [`config::RunnerConfig`]: environment-driven runner settings.
//! - [`completion::CompletionAction`]: what to do once the queue drains.

pub mod completion;
pub mod config;
pub mod control;
pub mod error;
pub mod runner;

pub use error::RunnerError;
pub use runner::{ExecuteNow, TaskRunner, TaskSubmission};
