#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use renderq_core::codec::{Origin, ParamValue, TaskArgs};
use renderq_core::task::{TaskKind, TaskStatus};
use renderq_db::repositories::TaskRepo;
use renderq_db::DbPool;
use renderq_engine::{GenInfo, RenderContext, RenderEngine, RenderError};
use renderq_events::TaskHooks;
use renderq_worker::config::RunnerConfig;
use renderq_worker::TaskRunner;

/// Fresh in-memory database with the current schema.
pub async fn test_pool() -> DbPool {
    let pool = renderq_db::create_memory_pool().await.unwrap();
    renderq_db::run_migrations(&pool).await.unwrap();
    pool
}

/// Config with short timings for tests.
pub fn test_config() -> RunnerConfig {
    RunnerConfig {
        busy_poll: Duration::from_millis(20),
        store_backoff: Duration::from_millis(20),
        callback_timeout: Duration::from_secs(2),
        ..RunnerConfig::default()
    }
}

pub fn prompt_args(prompt: &str) -> TaskArgs {
    let mut args = TaskArgs::new(TaskKind::GenerateFromText, Origin::Api);
    args.named.insert("prompt".into(), ParamValue::from(prompt));
    args.named.insert("steps".into(), ParamValue::Int(20));
    args
}

// ---------------------------------------------------------------------------
// StubEngine
// ---------------------------------------------------------------------------

/// Scripted render engine that records calls and concurrent entries.
#[derive(Default)]
pub struct StubEngine {
    pub calls: Mutex<Vec<String>>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub interrupts: AtomicUsize,
    outcomes: Mutex<VecDeque<Result<(), RenderError>>>,
    delay: Duration,
    /// When set, every render waits for an interrupt.
    block: bool,
    release: Notify,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Renders only return once interrupted.
    pub fn blocking() -> Self {
        Self {
            block: true,
            ..Self::default()
        }
    }

    /// Queue outcomes for the next renders; later renders succeed.
    pub fn script(self, outcomes: Vec<Result<(), RenderError>>) -> Self {
        *self.outcomes.lock().unwrap() = outcomes.into();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderEngine for StubEngine {
    async fn render(&self, ctx: RenderContext, _args: TaskArgs) -> Result<GenInfo, RenderError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.calls.lock().unwrap().push(ctx.task_id.clone());

        if self.block {
            self.release.notified().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(RenderError::Interrupted);
        }
        tokio::time::sleep(self.delay).await;

        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            ctx.artifacts
                .emit(format!("{}-1.png", ctx.task_id), "seed 1", false);
            ctx.artifacts
                .emit(format!("{}-grid.png", ctx.task_id), "grid", true);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        outcome.map(|()| GenInfo {
            infotexts: vec!["seed 1".into()],
            info: serde_json::json!({ "seed": 1 }),
        })
    }

    async fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.release.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Runner harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub pool: DbPool,
    pub engine: Arc<StubEngine>,
    pub runner: Arc<TaskRunner>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub async fn new(engine: StubEngine) -> Self {
        Self::with(test_pool().await, engine, TaskHooks::default(), test_config()).await
    }

    pub async fn with(
        pool: DbPool,
        engine: StubEngine,
        hooks: TaskHooks,
        config: RunnerConfig,
    ) -> Self {
        let engine = Arc::new(engine);
        let shutdown = CancellationToken::new();
        let runner = TaskRunner::start(
            pool.clone(),
            engine.clone(),
            hooks,
            config,
            shutdown.clone(),
        )
        .await
        .unwrap();
        Self {
            pool,
            engine,
            runner,
            shutdown,
        }
    }

    /// Spawn the worker loop; it stops when the harness is dropped.
    pub fn spawn_loop(&self) {
        tokio::spawn(self.runner.clone().run());
    }

    pub async fn status(&self, id: &str) -> TaskStatus {
        TaskRepo::require(&self.pool, id).await.unwrap().status
    }

    pub async fn wait_for_status(&self, id: &str, status: TaskStatus) {
        let pool = self.pool.clone();
        let id = id.to_string();
        wait_until(|| {
            let pool = pool.clone();
            let id = id.clone();
            async move { TaskRepo::require(&pool, &id).await.unwrap().status == status }
        })
        .await;
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 5s");
}
