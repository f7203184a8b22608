//! Route definitions for single-task operations.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/tasks`.
///
/// ```text
/// GET    /{id}                        -> get_task
/// PUT    /{id}                        -> update_task
/// DELETE /{id}                        -> delete_task
/// GET    /{id}/position               -> get_position
/// POST   /{id}/run                    -> run_task
/// POST   /{id}/requeue                -> requeue_task
/// POST   /{id}/retry                  -> retry_task
/// POST   /{id}/move/top               -> move_top
/// POST   /{id}/move/bottom            -> move_bottom
/// POST   /{id}/move/over/{other_id}   -> move_over
/// POST   /{id}/bookmark               -> bookmark_task
/// POST   /{id}/unbookmark             -> unbookmark_task
/// POST   /{id}/rename                 -> rename_task
/// GET    /{id}/results                -> get_results
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/{id}",
            get(tasks::get_task)
                .put(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/{id}/position", get(tasks::get_position))
        .route("/{id}/run", post(tasks::run_task))
        .route("/{id}/requeue", post(tasks::requeue_task))
        .route("/{id}/retry", post(tasks::retry_task))
        .route("/{id}/move/top", post(tasks::move_top))
        .route("/{id}/move/bottom", post(tasks::move_bottom))
        .route("/{id}/move/over/{other_id}", post(tasks::move_over))
        .route("/{id}/bookmark", post(tasks::bookmark_task))
        .route("/{id}/unbookmark", post(tasks::unbookmark_task))
        .route("/{id}/rename", post(tasks::rename_task))
        .route("/{id}/results", get(tasks::get_results))
}
