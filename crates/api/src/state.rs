use std::sync::Arc;

use renderq_worker::control::QueueService;
use renderq_worker::TaskRunner;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc` or is a pool.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: renderq_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Queue and history operations.
    pub queue: QueueService,
}

impl AppState {
    pub fn runner(&self) -> &Arc<TaskRunner> {
        self.queue.runner()
    }
}
