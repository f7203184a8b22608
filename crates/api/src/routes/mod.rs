pub mod health;
pub mod history;
pub mod queue;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /health                                   service health
///
/// /queue                                    pending + running tasks (GET)
/// /queue/txt2img                            enqueue text-to-image (POST)
/// /queue/img2img                            enqueue image-to-image (POST)
/// /queue/export                             export pending tasks (GET)
/// /queue/import                             import tasks (POST)
/// /queue/pause                              pause the worker (POST)
/// /queue/resume                             resume the worker (POST)
/// /queue/clear                              delete pending tasks (POST)
/// /queue/retry-failed                       reset failed tasks (POST)
///
/// /history                                  finished tasks (GET)
/// /history/clear                            delete finished tasks (POST)
///
/// /tasks/{id}                               get, update (PUT), delete
/// /tasks/{id}/position                      queue position (GET)
/// /tasks/{id}/run                           execute now (POST)
/// /tasks/{id}/requeue                       copy as new task (POST)
/// /tasks/{id}/retry                         reset in place (POST)
/// /tasks/{id}/move/top                      move to front (POST)
/// /tasks/{id}/move/bottom                   move to back (POST)
/// /tasks/{id}/move/over/{other_id}          take another task's slot (POST)
/// /tasks/{id}/bookmark                      bookmark (POST)
/// /tasks/{id}/unbookmark                    remove bookmark (POST)
/// /tasks/{id}/rename                        rename (POST)
/// /tasks/{id}/results                       images; ?zip=true for an archive (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/queue", queue::router())
        .nest("/history", history::router())
        .nest("/tasks", tasks::router())
}
