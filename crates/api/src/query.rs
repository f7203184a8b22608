//! Shared query parameter types for API handlers.

use serde::Deserialize;

use renderq_db::models::task::Page;

/// Page size when the request does not give one.
pub const DEFAULT_LIMIT: i64 = 50;

/// Largest page a single request may ask for.
pub const MAX_LIMIT: i64 = 500;

/// Generic pagination parameters (`?limit=&offset=`).
#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PaginationParams {
    /// Clamp to `1..=MAX_LIMIT` (default [`DEFAULT_LIMIT`]) and a
    /// non-negative offset.
    pub fn page(&self) -> Page {
        Page {
            limit: Some(self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)),
            offset: Some(self.offset.unwrap_or(0).max(0)),
        }
    }
}
