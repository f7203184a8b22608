//! Request handlers for the control surface.
//!
//! Handlers validate request bodies, delegate to the runner or the
//! [`QueueService`](renderq_worker::control::QueueService) and map errors
//! via [`AppError`](crate::error::AppError).

pub mod history;
pub mod queue;
pub mod tasks;
