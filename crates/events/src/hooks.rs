//! Lifecycle observers.
//!
//! Observers run one after another in registration order, each bounded by
//! the registry's timeout. A slow or hung observer is abandoned with a
//! warning and the next one still runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use renderq_core::task::TaskStatus;
use renderq_core::types::TaskId;

// ---------------------------------------------------------------------------
// FinishedTask
// ---------------------------------------------------------------------------

/// What observers learn about a task that left the Running state.
#[derive(Debug, Clone)]
pub struct FinishedTask {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Stored result: the success document or the failure text.
    pub result: Option<String>,
    /// Artifact paths, grids first. Empty unless the task is Done.
    pub images: Vec<String>,
    pub external_callback: Option<String>,
    pub upload_config: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// TaskObserver
// ---------------------------------------------------------------------------

/// Receives task lifecycle events. Every method defaults to a no-op.
#[async_trait]
pub trait TaskObserver: Send + Sync {
    async fn on_registered(&self, _task_id: &str) {}

    async fn on_started(&self, _task_id: &str) {}

    async fn on_finished(&self, _task: &FinishedTask) {}

    /// The queue has no Pending task left.
    async fn on_cleared(&self) {}
}

// ---------------------------------------------------------------------------
// TaskHooks
// ---------------------------------------------------------------------------

/// Ordered set of [`TaskObserver`]s.
#[derive(Clone)]
pub struct TaskHooks {
    observers: Vec<Arc<dyn TaskObserver>>,
    timeout: Duration,
}

impl TaskHooks {
    /// * `timeout` - Upper bound for a single observer call.
    pub fn new(timeout: Duration) -> Self {
        Self {
            observers: Vec::new(),
            timeout,
        }
    }

    pub fn register(&mut self, observer: Arc<dyn TaskObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub async fn registered(&self, task_id: &str) {
        for observer in &self.observers {
            self.bounded("task_registered", observer.on_registered(task_id))
                .await;
        }
    }

    pub async fn started(&self, task_id: &str) {
        for observer in &self.observers {
            self.bounded("task_started", observer.on_started(task_id))
                .await;
        }
    }

    pub async fn finished(&self, task: &FinishedTask) {
        for observer in &self.observers {
            self.bounded("task_finished", observer.on_finished(task))
                .await;
        }
    }

    pub async fn cleared(&self) {
        for observer in &self.observers {
            self.bounded("task_cleared", observer.on_cleared()).await;
        }
    }

    async fn bounded(&self, hook: &'static str, call: impl Future<Output = ()>) {
        if tokio::time::timeout(self.timeout, call).await.is_err() {
            tracing::warn!(
                hook,
                timeout_ms = self.timeout.as_millis() as u64,
                "Lifecycle callback timed out"
            );
        }
    }
}

impl Default for TaskHooks {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
