//! The single background worker draining the queue.
//!
//! One [`TaskRunner`] exists per process. Its [`run`](TaskRunner::run) loop
//! pops the lowest-priority Pending task, renders it while holding the
//! render mutex, persists the outcome and fires the lifecycle hooks. With
//! nothing to do it parks until a registration, a resume or an immediate
//! execution request wakes it.
//!
//! A resource-exhaustion failure pauses the whole queue: the loop stops
//! pulling tasks until [`resume`](TaskRunner::resume) is called.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use renderq_core::codec::{self, TaskArgs};
use renderq_core::task::TaskStatus;
use renderq_core::types::{new_task_id, now_millis, TaskId};
use renderq_db::models::app_state::QueueState;
use renderq_db::models::task::{NewTask, Reprioritize, Task, TaskFilter};
use renderq_db::repositories::{AppStateRepo, TaskRepo};
use renderq_db::{DbError, DbPool};
use renderq_engine::{ArtifactSaved, ArtifactSink, GenInfo, RenderContext, RenderEngine, RenderError};
use renderq_events::{FinishedTask, TaskHooks};

use crate::config::RunnerConfig;
use crate::error::RunnerError;

// ---------------------------------------------------------------------------
// Inputs and outcomes
// ---------------------------------------------------------------------------

/// A task to enqueue.
#[derive(Debug, Clone)]
pub struct TaskSubmission {
    /// Generated when absent.
    pub id: Option<TaskId>,
    pub args: TaskArgs,
    /// Defaults to the current time in milliseconds.
    pub priority: Option<i64>,
    pub display_name: Option<String>,
    pub external_id: Option<String>,
    pub external_callback: Option<String>,
    pub upload_config: Option<serde_json::Value>,
}

impl TaskSubmission {
    pub fn new(args: TaskArgs) -> Self {
        Self {
            id: None,
            args,
            priority: None,
            display_name: None,
            external_id: None,
            external_callback: None,
            upload_config: None,
        }
    }
}

/// What [`TaskRunner::execute_now`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteNow {
    /// The render slot was free; the task runs next on the worker.
    Started,
    /// Another task occupies the slot; the target was moved to the top.
    MovedToTop,
}

/// How one execution ended.
#[derive(Debug)]
enum Outcome {
    Done { result: String, images: Vec<String> },
    Failed(String),
    /// Failed, and the queue must pause.
    Exhausted(String),
    Interrupted,
    /// Generic failure reset to Pending by the auto-requeue policy.
    Requeued,
}

// ---------------------------------------------------------------------------
// TaskRunner
// ---------------------------------------------------------------------------

pub struct TaskRunner {
    pool: DbPool,
    engine: Arc<dyn RenderEngine>,
    hooks: TaskHooks,
    config: RunnerConfig,
    /// Held for the whole of one render; the single-flight guarantee.
    render_lock: Mutex<()>,
    paused: AtomicBool,
    current: RwLock<Option<TaskId>>,
    interrupted: Mutex<Option<TaskId>>,
    /// Task requested through `execute_now`, run before anything queued.
    immediate: Mutex<Option<TaskId>>,
    /// Advisory count of Pending tasks; the store's count is authoritative.
    pending_hint: AtomicI64,
    wake: Notify,
    dispose: CancellationToken,
    shutdown: CancellationToken,
}

impl TaskRunner {
    /// Build the runner and restore persisted state.
    ///
    /// Tasks left Running by a previous process become Interrupted, and the
    /// pause flag is read back from `app_state`. The runner stops when
    /// `shutdown` is cancelled or [`dispose`](TaskRunner::dispose) is called.
    pub async fn start(
        pool: DbPool,
        engine: Arc<dyn RenderEngine>,
        hooks: TaskHooks,
        config: RunnerConfig,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, RunnerError> {
        let stale = TaskRepo::interrupt_stale_running(&pool).await?;
        if stale > 0 {
            tracing::warn!(count = stale, "Marked tasks left running by a previous process as interrupted");
        }
        let paused = AppStateRepo::queue_state(&pool).await? == QueueState::Paused;
        let pending = TaskRepo::count(&pool, &TaskFilter::status(TaskStatus::Pending)).await?;
        tracing::info!(paused, pending, "Task runner initialised");

        Ok(Arc::new(Self {
            pool,
            engine,
            hooks,
            config,
            render_lock: Mutex::new(()),
            paused: AtomicBool::new(paused),
            current: RwLock::new(None),
            interrupted: Mutex::new(None),
            immediate: Mutex::new(None),
            pending_hint: AtomicI64::new(pending),
            wake: Notify::new(),
            dispose: shutdown.child_token(),
            shutdown,
        }))
    }

    // ---- control ----

    /// Validate, persist and enqueue a task.
    pub async fn register(&self, submission: TaskSubmission) -> Result<Task, RunnerError> {
        let encoded = codec::encode(&submission.args)?;
        let new_task = NewTask {
            id: submission.id.unwrap_or_else(new_task_id),
            external_id: submission.external_id,
            external_callback: submission.external_callback,
            upload_config: submission.upload_config,
            display_name: submission.display_name,
            kind: submission.args.kind,
            params: encoded.params,
            script_params: encoded.script_params,
            priority: submission.priority,
        };
        self.enqueue(&new_task).await
    }

    /// Persist an already-encoded task and wake the loop.
    pub async fn enqueue(&self, new_task: &NewTask) -> Result<Task, RunnerError> {
        let task = TaskRepo::add(&self.pool, new_task).await?;
        tracing::info!(task_id = %task.id, kind = %task.kind, priority = task.priority, "Task registered");

        self.hooks.registered(&task.id).await;
        self.pending_hint.fetch_add(1, Ordering::SeqCst);
        self.wake.notify_one();
        Ok(task)
    }

    /// Run `id` right away if nothing is rendering, otherwise move it to the
    /// top of the queue. Never preempts the running task.
    pub async fn execute_now(&self, id: &str) -> Result<ExecuteNow, RunnerError> {
        let task = TaskRepo::require(&self.pool, id).await?;
        if task.status == TaskStatus::Running || self.current_task_id().await.as_deref() == Some(id) {
            return Err(RunnerError::AlreadyRunning(task.id));
        }

        let busy = self.current.read().await.is_some() || self.render_lock.try_lock().is_err();
        if busy {
            TaskRepo::reprioritize(&self.pool, id, Reprioritize::Top).await?;
            tracing::info!(task_id = %id, "Render slot busy, task moved to top of queue");
            self.wake.notify_one();
            return Ok(ExecuteNow::MovedToTop);
        }

        *self.immediate.lock().await = Some(task.id);
        self.wake.notify_one();
        tracing::info!(task_id = %id, "Task scheduled for immediate execution");
        Ok(ExecuteNow::Started)
    }

    /// Stop pulling new tasks. The running task, if any, finishes normally.
    pub async fn pause(&self) -> Result<(), RunnerError> {
        AppStateRepo::set_queue_state(&self.pool, QueueState::Paused).await?;
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("Queue paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), RunnerError> {
        AppStateRepo::set_queue_state(&self.pool, QueueState::Running).await?;
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        tracing::info!("Queue resumed");
        Ok(())
    }

    /// Ask the engine to interrupt `id` if it is the running task.
    ///
    /// Returns whether `id` was running.
    pub async fn interrupt(&self, id: &str) -> bool {
        if self.current.read().await.as_deref() != Some(id) {
            return false;
        }
        *self.interrupted.lock().await = Some(id.to_string());
        self.engine.interrupt().await;
        tracing::info!(task_id = %id, "Interrupt requested");
        true
    }

    /// Nudge the loop to re-read the queue, e.g. after tasks were imported
    /// or reset to Pending outside [`register`](TaskRunner::register).
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Make the loop exit after its current iteration.
    pub fn dispose(&self) {
        self.dispose.cancel();
    }

    // ---- state ----

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn current_task_id(&self) -> Option<TaskId> {
        self.current.read().await.clone()
    }

    pub fn pending_hint(&self) -> i64 {
        self.pending_hint.load(Ordering::SeqCst)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    // ---- loop ----

    /// Run the worker loop until disposed or the shutdown token fires.
    pub async fn run(self: Arc<Self>) {
        tracing::info!("Task runner started");
        // No `task_cleared` until at least one task has been picked up.
        let mut drained = true;

        while !self.dispose.is_cancelled() {
            let immediate = self.immediate.lock().await.take();
            if let Some(id) = immediate {
                self.run_by_id(&id).await;
                continue;
            }

            if self.is_paused() {
                self.park().await;
                continue;
            }

            if let Err(e) = self.sweep_retention().await {
                tracing::warn!(error = %e, "Retention sweep failed");
            }

            match TaskRepo::count(&self.pool, &TaskFilter::status(TaskStatus::Running)).await {
                Ok(0) => {}
                Ok(running) => {
                    tracing::warn!(running, "Another task is marked running, waiting");
                    self.sleep(self.config.busy_poll).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Store unavailable while checking running tasks");
                    self.sleep(self.config.store_backoff).await;
                    continue;
                }
            }

            match TaskRepo::next_pending(&self.pool).await {
                Ok(Some(task)) => {
                    drained = false;
                    self.execute(task).await;
                }
                Ok(None) => {
                    self.pending_hint.store(0, Ordering::SeqCst);
                    if !drained {
                        drained = true;
                        self.on_drained().await;
                    }
                    self.park().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Store unavailable while fetching next task");
                    self.sleep(self.config.store_backoff).await;
                }
            }
        }
        tracing::info!("Task runner stopped");
    }

    /// Delete terminal, non-bookmarked tasks older than the retention window.
    pub async fn sweep_retention(&self) -> Result<u64, RunnerError> {
        let Some(window) = self.config.retention() else {
            return Ok(0);
        };
        let before = chrono::Utc::now() - window;
        let deleted = TaskRepo::delete_bulk(&self.pool, &TaskStatus::TERMINAL, Some(before)).await?;
        if deleted > 0 {
            tracing::info!(deleted, retention_days = self.config.retention_days, "Swept old tasks");
        }
        Ok(deleted)
    }

    async fn park(&self) {
        tokio::select! {
            _ = self.dispose.cancelled() => {}
            _ = self.wake.notified() => {}
        }
    }

    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = self.dispose.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    async fn on_drained(&self) {
        tracing::info!("Queue drained");
        self.hooks.cleared().await;

        let action = self.config.completion_action;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { action.run(&shutdown).await });
    }

    async fn run_by_id(&self, id: &str) {
        match TaskRepo::get(&self.pool, id).await {
            Ok(Some(task)) if task.status != TaskStatus::Running => self.execute(task).await,
            Ok(Some(_)) => tracing::warn!(task_id = %id, "Immediate task is already running"),
            Ok(None) => tracing::warn!(task_id = %id, "Immediate task no longer exists"),
            Err(e) => tracing::error!(task_id = %id, error = %e, "Failed to load immediate task"),
        }
    }

    // ---- execution ----

    async fn execute(&self, task: Task) {
        let _slot = self.render_lock.lock().await;
        let id = task.id.clone();

        *self.interrupted.lock().await = None;
        *self.current.write().await = Some(id.clone());
        if let Err(e) = TaskRepo::set_status(&self.pool, &id, TaskStatus::Running, None).await {
            tracing::error!(task_id = %id, error = %e, "Failed to mark task running");
            *self.current.write().await = None;
            return;
        }
        if task.status == TaskStatus::Pending {
            let _ = self
                .pending_hint
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n - 1).max(0)));
        }
        tracing::info!(task_id = %id, kind = %task.kind, "Task started");
        self.hooks.started(&id).await;

        let outcome = match codec::decode(&task.params, &task.script_params) {
            Ok(args) => {
                let (sink, mut log) = ArtifactSink::channel();
                let ctx = RenderContext {
                    task_id: id.clone(),
                    artifacts: sink,
                };
                let rendered = self.engine.render(ctx, args).await;
                let interrupted = self.interrupted.lock().await.take().as_deref() == Some(id.as_str());
                self.classify(&id, rendered, log.drain(), interrupted)
            }
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "Task payload cannot be decoded");
                Outcome::Failed(format!("Corrupt task payload: {e}"))
            }
        };

        self.finish(&task, outcome).await;
        *self.current.write().await = None;
    }

    fn classify(
        &self,
        id: &str,
        rendered: Result<GenInfo, RenderError>,
        artifacts: Vec<ArtifactSaved>,
        interrupted: bool,
    ) -> Outcome {
        match rendered {
            Err(RenderError::ResourceExhausted(msg)) => {
                tracing::error!(task_id = %id, error = %msg, "Render ran out of resources, pausing queue");
                Outcome::Exhausted(msg)
            }
            Err(RenderError::Interrupted) => Outcome::Interrupted,
            _ if interrupted => Outcome::Interrupted,
            Err(RenderError::Failed(msg)) => {
                tracing::error!(task_id = %id, error = %msg, "Render failed");
                if self.config.auto_requeue_failed {
                    Outcome::Requeued
                } else {
                    Outcome::Failed(msg)
                }
            }
            Ok(gen) => {
                let images: Vec<String> = artifacts.iter().map(|a| a.path.clone()).collect();
                let infotexts: Vec<&str> = artifacts.iter().map(|a| a.info.as_str()).collect();
                let result = json!({
                    "images": images,
                    "infotexts": infotexts,
                    "geninfo": gen,
                });
                Outcome::Done {
                    result: result.to_string(),
                    images,
                }
            }
        }
    }

    async fn finish(&self, task: &Task, outcome: Outcome) {
        let id = task.id.as_str();
        let (status, result, images) = match outcome {
            Outcome::Requeued => {
                match TaskRepo::requeue_in_place(&self.pool, id, now_millis()).await {
                    Ok(()) => {
                        self.pending_hint.fetch_add(1, Ordering::SeqCst);
                        tracing::info!(task_id = %id, "Failed task requeued");
                    }
                    Err(e) => log_persist_error(id, &e),
                }
                return;
            }
            Outcome::Done { result, images } => (TaskStatus::Done, Some(result), images),
            Outcome::Failed(msg) => (TaskStatus::Failed, Some(msg), Vec::new()),
            Outcome::Exhausted(msg) => {
                if let Err(e) = self.pause().await {
                    tracing::error!(error = %e, "Failed to persist pause after resource exhaustion");
                    self.paused.store(true, Ordering::SeqCst);
                }
                (TaskStatus::Failed, Some(msg), Vec::new())
            }
            Outcome::Interrupted => (TaskStatus::Interrupted, None, Vec::new()),
        };

        if let Err(e) = TaskRepo::set_status(&self.pool, id, status, result.as_deref()).await {
            log_persist_error(id, &e);
        }
        tracing::info!(task_id = %id, status = %status, images = images.len(), "Task finished");

        let finished = FinishedTask {
            task_id: task.id.clone(),
            status,
            result,
            images,
            external_callback: task.external_callback.clone(),
            upload_config: task.upload_config.clone(),
        };
        self.hooks.finished(&finished).await;
    }
}

fn log_persist_error(id: &str, err: &DbError) {
    match err {
        DbError::NotFound(_) => {
            tracing::warn!(task_id = %id, "Task was deleted while running");
        }
        other => {
            tracing::error!(task_id = %id, error = %other, "Failed to persist task outcome");
        }
    }
}
