use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use renderq_worker::control::HistoryStatus;

use crate::error::AppResult;
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Query parameters for GET /history.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// all, bookmarked, done, failed or interrupted.
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub deleted: u64,
}

/// GET /api/v1/history
///
/// Finished tasks, most recently queued first.
pub async fn list_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> AppResult<impl IntoResponse> {
    let status: HistoryStatus = params.status.as_deref().unwrap_or_default().parse()?;
    let page = PaginationParams {
        limit: params.limit,
        offset: params.offset,
    }
    .page();

    let history = state.queue.history(status, page).await?;
    Ok(Json(DataResponse { data: history }))
}

/// POST /api/v1/history/clear
///
/// Bookmarked tasks are kept.
pub async fn clear_history(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let deleted = state.queue.clear_history().await?;
    Ok(Json(DataResponse {
        data: ClearedResponse { deleted },
    }))
}
