//! Integration tests for the worker loop: ordering, single flight, outcome
//! handling, pause on resource exhaustion and the retention sweep.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use common::{prompt_args, test_config, test_pool, wait_until, Harness, StubEngine};
use renderq_core::task::{TaskKind, TaskStatus};
use renderq_core::types::{new_task_id, now_millis, Timestamp};
use renderq_db::models::app_state::QueueState;
use renderq_db::models::task::{ListOrder, NewTask, Page, Task, TaskFilter};
use renderq_db::repositories::{AppStateRepo, TaskRepo};
use renderq_engine::RenderError;
use renderq_events::{TaskHooks, TaskObserver};
use renderq_worker::{ExecuteNow, RunnerError, TaskSubmission};

async fn register(h: &Harness, prompt: &str) -> String {
    h.runner
        .register(TaskSubmission::new(prompt_args(prompt)))
        .await
        .unwrap()
        .id
}

async fn register_at(h: &Harness, prompt: &str, priority: i64) -> String {
    let mut submission = TaskSubmission::new(prompt_args(prompt));
    submission.priority = Some(priority);
    h.runner.register(submission).await.unwrap().id
}

// ---------------------------------------------------------------------------
// Ordering and single flight
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tasks_run_in_priority_order_and_history_lists_newest_first() {
    let h = Harness::new(StubEngine::new()).await;
    let base = now_millis();
    let first = register_at(&h, "one", base).await;
    let second = register_at(&h, "two", base + 1).await;
    let third = register_at(&h, "three", base + 2).await;

    h.spawn_loop();
    h.wait_for_status(&third, TaskStatus::Done).await;

    assert_eq!(h.engine.calls(), vec![first.clone(), second.clone(), third.clone()]);

    let done: Vec<String> = TaskRepo::list(
        &h.pool,
        &TaskFilter::status(TaskStatus::Done),
        Page::default(),
        ListOrder::Desc,
    )
    .await
    .unwrap()
    .into_iter()
    .map(|t| t.id)
    .collect();
    assert_eq!(done, vec![third, second, first]);
}

#[tokio::test]
async fn concurrent_registrations_never_render_in_parallel() {
    let h = Harness::new(StubEngine::with_delay(Duration::from_millis(15))).await;
    h.spawn_loop();

    let mut handles = Vec::new();
    for i in 0..8 {
        let runner = h.runner.clone();
        handles.push(tokio::spawn(async move {
            runner
                .register(TaskSubmission::new(prompt_args(&format!("task {i}"))))
                .await
                .unwrap()
                .id
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let pool = h.pool.clone();
    wait_until(|| {
        let pool = pool.clone();
        async move {
            TaskRepo::count(&pool, &TaskFilter::status(TaskStatus::Done))
                .await
                .unwrap()
                == 8
        }
    })
    .await;

    assert_eq!(h.engine.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.calls().len(), 8);
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn success_stores_images_with_grids_first() {
    let h = Harness::new(StubEngine::new()).await;
    let id = register(&h, "castle").await;
    h.spawn_loop();
    h.wait_for_status(&id, TaskStatus::Done).await;

    let task = TaskRepo::require(&h.pool, &id).await.unwrap();
    let result: serde_json::Value = serde_json::from_str(task.result.as_deref().unwrap()).unwrap();
    assert_eq!(result["images"][0], format!("{id}-grid.png"));
    assert_eq!(result["images"][1], format!("{id}-1.png"));
    assert_eq!(result["infotexts"][0], "grid");
    assert_eq!(result["geninfo"]["info"]["seed"], 1);
}

#[tokio::test]
async fn resource_exhaustion_fails_task_and_pauses_queue() {
    let engine = StubEngine::new().script(vec![Err(RenderError::ResourceExhausted(
        "CUDA out of memory".into(),
    ))]);
    let h = Harness::new(engine).await;
    let oom = register(&h, "huge").await;
    h.spawn_loop();
    h.wait_for_status(&oom, TaskStatus::Failed).await;

    let failed = TaskRepo::require(&h.pool, &oom).await.unwrap();
    assert_eq!(failed.result.as_deref(), Some("CUDA out of memory"));
    wait_until(|| async { h.runner.is_paused() }).await;
    assert_eq!(
        AppStateRepo::queue_state(&h.pool).await.unwrap(),
        QueueState::Paused
    );

    // Registration wakes the loop but nothing runs while paused.
    let next = register(&h, "small").await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.status(&next).await, TaskStatus::Pending);
    assert_eq!(h.engine.calls().len(), 1);

    h.runner.resume().await.unwrap();
    h.wait_for_status(&next, TaskStatus::Done).await;
    assert!(!h.runner.is_paused());
}

#[tokio::test]
async fn generic_failure_records_error_text_without_pausing() {
    let engine = StubEngine::new().script(vec![Err(RenderError::Failed("bad sampler".into()))]);
    let h = Harness::new(engine).await;
    let id = register(&h, "x").await;
    let after = register(&h, "y").await;
    h.spawn_loop();

    h.wait_for_status(&after, TaskStatus::Done).await;
    let task = TaskRepo::require(&h.pool, &id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.result.as_deref(), Some("bad sampler"));
    assert!(!h.runner.is_paused());
}

#[tokio::test]
async fn auto_requeue_resets_failed_task_to_pending() {
    let engine = StubEngine::new().script(vec![Err(RenderError::Failed("flaky".into()))]);
    let config = renderq_worker::config::RunnerConfig {
        auto_requeue_failed: true,
        ..test_config()
    };
    let h = Harness::with(test_pool().await, engine, TaskHooks::default(), config).await;
    let id = register(&h, "retry me").await;
    h.spawn_loop();

    h.wait_for_status(&id, TaskStatus::Done).await;
    assert_eq!(h.engine.calls(), vec![id.clone(), id]);
}

#[tokio::test]
async fn corrupt_payload_fails_task_and_loop_continues() {
    let h = Harness::new(StubEngine::new()).await;
    let mut broken = NewTask::new(
        new_task_id(),
        TaskKind::GenerateFromText,
        "not json".into(),
        Vec::new(),
    );
    broken.priority = Some(1);
    let broken = TaskRepo::add(&h.pool, &broken).await.unwrap().id;
    let healthy = register(&h, "fine").await;
    h.spawn_loop();

    h.wait_for_status(&healthy, TaskStatus::Done).await;
    let task = TaskRepo::require(&h.pool, &broken).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.result.unwrap().starts_with("Corrupt task payload"));
    assert_eq!(h.engine.calls(), vec![healthy]);
}

#[tokio::test]
async fn oversized_image_record_fails_task_and_loop_continues() {
    use base64::Engine as _;

    let h = Harness::new(StubEngine::new()).await;
    let data = base64::engine::general_purpose::STANDARD
        .encode(renderq_core::codec::compress(&[]).unwrap());
    let params = serde_json::json!({
        "args": {
            "init": {
                "$codec": "image",
                "mode": "RGBAF",
                "width": u32::MAX,
                "height": u32::MAX,
                "data": data,
            },
        },
        "is_ui": false,
        "is_img2img": false,
    });
    let mut huge = NewTask::new(
        new_task_id(),
        TaskKind::GenerateFromText,
        params.to_string(),
        Vec::new(),
    );
    huge.priority = Some(1);
    let huge = TaskRepo::add(&h.pool, &huge).await.unwrap().id;
    let healthy = register(&h, "fine").await;
    h.spawn_loop();

    h.wait_for_status(&healthy, TaskStatus::Done).await;
    let task = TaskRepo::require(&h.pool, &huge).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.result.unwrap().contains("too large"));
    assert_eq!(h.engine.calls(), vec![healthy]);
}

#[tokio::test]
async fn interrupt_marks_running_task_interrupted() {
    let h = Harness::new(StubEngine::blocking()).await;
    let id = register(&h, "long").await;
    h.spawn_loop();

    wait_until(|| async { h.runner.current_task_id().await.as_deref() == Some(id.as_str()) }).await;
    assert!(!h.runner.interrupt("someone-else").await);
    assert!(h.runner.interrupt(&id).await);

    h.wait_for_status(&id, TaskStatus::Interrupted).await;
    assert!(!h.runner.is_paused());
    assert_eq!(h.engine.interrupts.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// execute_now
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execute_now_runs_immediately_even_when_paused() {
    let h = Harness::new(StubEngine::new()).await;
    h.runner.pause().await.unwrap();
    let id = register(&h, "now").await;
    h.spawn_loop();

    assert_eq!(h.runner.execute_now(&id).await.unwrap(), ExecuteNow::Started);
    h.wait_for_status(&id, TaskStatus::Done).await;
    assert!(h.runner.is_paused());
}

#[tokio::test]
async fn execute_now_while_busy_moves_task_to_top() {
    let h = Harness::new(StubEngine::blocking()).await;
    let running = register_at(&h, "a", 10).await;
    h.spawn_loop();
    wait_until(|| async { h.runner.current_task_id().await.is_some() }).await;

    let b = register_at(&h, "b", 20).await;
    let c = register_at(&h, "c", 30).await;

    assert_eq!(h.runner.execute_now(&c).await.unwrap(), ExecuteNow::MovedToTop);
    assert_eq!(TaskRepo::position_of(&h.pool, &c).await.unwrap(), 0);
    assert_eq!(TaskRepo::position_of(&h.pool, &b).await.unwrap(), 1);

    assert_matches!(
        h.runner.execute_now(&running).await,
        Err(RunnerError::AlreadyRunning(id)) if id == running
    );
    h.runner.interrupt(&running).await;
    h.wait_for_status(&running, TaskStatus::Interrupted).await;
}

// ---------------------------------------------------------------------------
// Startup, hooks and housekeeping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn startup_interrupts_stale_running_tasks_and_restores_pause() {
    let pool = test_pool().await;
    let stale = TaskRepo::add(
        &pool,
        &NewTask::new(new_task_id(), TaskKind::GenerateFromText, "{}".into(), Vec::new()),
    )
    .await
    .unwrap();
    TaskRepo::set_status(&pool, &stale.id, TaskStatus::Running, None)
        .await
        .unwrap();
    AppStateRepo::set_queue_state(&pool, QueueState::Paused)
        .await
        .unwrap();

    let h = Harness::with(pool, StubEngine::new(), TaskHooks::default(), test_config()).await;

    assert_eq!(h.status(&stale.id).await, TaskStatus::Interrupted);
    assert!(h.runner.is_paused());
}

#[derive(Default)]
struct CountCleared(AtomicUsize);

#[async_trait]
impl TaskObserver for CountCleared {
    async fn on_cleared(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn cleared_fires_once_per_drain() {
    let cleared = Arc::new(CountCleared::default());
    let mut hooks = TaskHooks::new(Duration::from_secs(1));
    hooks.register(cleared.clone());
    let h = Harness::with(test_pool().await, StubEngine::new(), hooks, test_config()).await;
    h.spawn_loop();

    // An empty queue at startup is not a drain.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cleared.0.load(Ordering::SeqCst), 0);

    h.runner.pause().await.unwrap();
    register(&h, "a").await;
    register(&h, "b").await;
    h.runner.resume().await.unwrap();
    wait_until(|| async { cleared.0.load(Ordering::SeqCst) == 1 }).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cleared.0.load(Ordering::SeqCst), 1);

    register(&h, "c").await;
    wait_until(|| async { cleared.0.load(Ordering::SeqCst) == 2 }).await;
}

fn aged_task(status: TaskStatus, bookmarked: bool, created_at: Timestamp) -> Task {
    Task {
        id: new_task_id(),
        external_id: None,
        external_callback: None,
        upload_config: None,
        display_name: None,
        kind: TaskKind::GenerateFromText,
        params: "{}".into(),
        script_params: Vec::new(),
        priority: created_at.timestamp_millis(),
        status,
        result: None,
        bookmarked,
        created_at,
        updated_at: created_at,
    }
}

#[tokio::test]
async fn retention_sweep_spares_bookmarked_and_unfinished_tasks() {
    let h = Harness::new(StubEngine::new()).await;
    let long_ago = Utc::now() - chrono::Duration::days(45);

    let mut ids = Vec::new();
    for (status, bookmarked) in [
        (TaskStatus::Failed, true),
        (TaskStatus::Failed, false),
        (TaskStatus::Pending, false),
    ] {
        let task = TaskRepo::upsert(&h.pool, &aged_task(status, bookmarked, long_ago))
            .await
            .unwrap();
        ids.push(task.id);
    }
    let recent = register(&h, "recent").await;
    TaskRepo::set_status(&h.pool, &recent, TaskStatus::Done, None)
        .await
        .unwrap();

    assert_eq!(h.runner.sweep_retention().await.unwrap(), 1);
    assert!(TaskRepo::get(&h.pool, &ids[0]).await.unwrap().is_some());
    assert!(TaskRepo::get(&h.pool, &ids[1]).await.unwrap().is_none());
    assert!(TaskRepo::get(&h.pool, &ids[2]).await.unwrap().is_some());
    assert!(TaskRepo::get(&h.pool, &recent).await.unwrap().is_some());
}

#[tokio::test]
async fn retention_of_zero_keeps_everything() {
    let config = renderq_worker::config::RunnerConfig {
        retention_days: 0,
        ..test_config()
    };
    let h = Harness::with(test_pool().await, StubEngine::new(), TaskHooks::default(), config).await;
    assert_eq!(h.runner.sweep_retention().await.unwrap(), 0);
}
