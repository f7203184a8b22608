use axum::routing::{get, post};
use axum::Router;

use crate::handlers::history;
use crate::state::AppState;

/// Routes mounted at `/history`.
///
/// ```text
/// GET  /       -> list_history
/// POST /clear  -> clear_history
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(history::list_history))
        .route("/clear", post(history::clear_history))
}
