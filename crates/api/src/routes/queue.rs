//! Route definitions for the pending queue.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::queue;
use crate::state::AppState;

/// Routes mounted at `/queue`.
///
/// ```text
/// GET  /              -> get_queue
/// POST /txt2img       -> enqueue_txt2img
/// POST /img2img       -> enqueue_img2img
/// GET  /export        -> export_queue
/// POST /import        -> import_queue
/// POST /pause         -> pause_queue
/// POST /resume        -> resume_queue
/// POST /clear         -> clear_queue
/// POST /retry-failed  -> retry_failed
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(queue::get_queue))
        .route("/txt2img", post(queue::enqueue_txt2img))
        .route("/img2img", post(queue::enqueue_img2img))
        .route("/export", get(queue::export_queue))
        .route("/import", post(queue::import_queue))
        .route("/pause", post(queue::pause_queue))
        .route("/resume", post(queue::resume_queue))
        .route("/clear", post(queue::clear_queue))
        .route("/retry-failed", post(queue::retry_failed))
}
