//! Queue and history operations for callers outside the worker loop.
//!
//! Everything here only reads and writes the task store and toggles runner
//! flags; rendering stays on the runner's loop.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use renderq_core::codec::{self, set_path, ParamValue, ScriptRegistry};
use renderq_core::error::CoreError;
use renderq_core::task::{TaskKind, TaskStatus};
use renderq_core::types::{from_millis, new_task_id, now_millis, TaskId};
use renderq_db::models::task::{ListOrder, NewTask, Page, Reprioritize, Task, TaskFilter};
use renderq_db::repositories::TaskRepo;
use renderq_db::DbPool;

use crate::error::RunnerError;
use crate::runner::TaskRunner;

/// Prefix given to the display name of a requeued copy.
pub const COPY_PREFIX: &str = "Copy of ";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where to move a task in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTarget {
    Top,
    Bottom,
    /// Take the priority of this other task, which moves back by one.
    Over(TaskId),
}

/// Which terminal tasks a history listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryStatus {
    #[default]
    All,
    Bookmarked,
    Done,
    Failed,
    Interrupted,
}

impl HistoryStatus {
    pub fn filter(self) -> TaskFilter {
        match self {
            HistoryStatus::All => TaskFilter::statuses(&TaskStatus::TERMINAL),
            HistoryStatus::Bookmarked => TaskFilter {
                bookmarked: Some(true),
                ..TaskFilter::statuses(&TaskStatus::TERMINAL)
            },
            HistoryStatus::Done => TaskFilter::status(TaskStatus::Done),
            HistoryStatus::Failed => TaskFilter::status(TaskStatus::Failed),
            HistoryStatus::Interrupted => TaskFilter::status(TaskStatus::Interrupted),
        }
    }
}

impl FromStr for HistoryStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(HistoryStatus::All),
            "bookmarked" => Ok(HistoryStatus::Bookmarked),
            "done" => Ok(HistoryStatus::Done),
            "failed" => Ok(HistoryStatus::Failed),
            "interrupted" => Ok(HistoryStatus::Interrupted),
            other => Err(CoreError::Validation(format!("unknown history status '{other}'"))),
        }
    }
}

/// A page of tasks plus the total matching count.
#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: i64,
}

/// Pending and running tasks with the runner's state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub tasks: Vec<Task>,
    pub total_pending: i64,
    pub paused: bool,
    pub current_task_id: Option<TaskId>,
}

/// Partial update of a stored task.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub checkpoint: Option<String>,
    /// Named arguments to set, keyed by dot path (`"alwayson.0.strength"`).
    pub params: BTreeMap<String, ParamValue>,
}

/// One image of a finished task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultImage {
    pub path: String,
    pub infotext: String,
}

/// Portable form of a task for export and import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedTask {
    #[serde(default)]
    pub id: Option<TaskId>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub external_callback: Option<String>,
    #[serde(default)]
    pub upload_config: Option<serde_json::Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// The stored named-parameter document.
    pub params: serde_json::Value,
    /// Base64 of the stored positional blob.
    #[serde(default)]
    pub script_params: String,
    /// Positional arguments by name, present when the task's script is
    /// registered. Takes precedence over `script_params` on import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_args: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub bookmarked: bool,
    /// Unix milliseconds.
    #[serde(default)]
    pub created_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// QueueService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct QueueService {
    runner: Arc<TaskRunner>,
    scripts: Arc<ScriptRegistry>,
}

impl QueueService {
    pub fn new(runner: Arc<TaskRunner>, scripts: Arc<ScriptRegistry>) -> Self {
        Self { runner, scripts }
    }

    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    fn pool(&self) -> &DbPool {
        self.runner.pool()
    }

    // ---- queries ----

    pub async fn get(&self, id: &str) -> Result<Task, RunnerError> {
        Ok(TaskRepo::require(self.pool(), id).await?)
    }

    /// Queue position of `id`, `None` unless it is Pending.
    pub async fn position(&self, id: &str) -> Result<Option<i64>, RunnerError> {
        let task = TaskRepo::require(self.pool(), id).await?;
        if task.status != TaskStatus::Pending {
            return Ok(None);
        }
        Ok(Some(TaskRepo::position_of(self.pool(), id).await?))
    }

    /// Running task first, then Pending tasks in dequeue order.
    pub async fn queue(&self, page: Page) -> Result<QueueSnapshot, RunnerError> {
        let pool = self.pool();
        let pending_filter = TaskFilter::status(TaskStatus::Pending);
        let mut tasks = TaskRepo::list(pool, &TaskFilter::status(TaskStatus::Running), Page::default(), ListOrder::Asc).await?;
        tasks.extend(TaskRepo::list(pool, &pending_filter, page, ListOrder::Asc).await?);

        Ok(QueueSnapshot {
            tasks,
            total_pending: TaskRepo::count(pool, &pending_filter).await?,
            paused: self.runner.is_paused(),
            current_task_id: self.runner.current_task_id().await,
        })
    }

    /// Terminal tasks, newest priority first.
    pub async fn history(&self, status: HistoryStatus, page: Page) -> Result<TaskPage, RunnerError> {
        let filter = status.filter();
        Ok(TaskPage {
            tasks: TaskRepo::list(self.pool(), &filter, page, ListOrder::Desc).await?,
            total: TaskRepo::count(self.pool(), &filter).await?,
        })
    }

    /// Images and infotexts of a Done task.
    pub async fn results(&self, id: &str) -> Result<Vec<ResultImage>, RunnerError> {
        let task = TaskRepo::require(self.pool(), id).await?;
        if task.status != TaskStatus::Done {
            return Err(CoreError::Conflict(format!("Task is {}", task.status)).into());
        }
        let raw = task
            .result
            .ok_or_else(|| CoreError::Conflict("Task result is not available".into()))?;
        let result: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| codec::CodecError::CorruptPayload(format!("task result: {e}")))?;

        let infotexts = result
            .get("infotexts")
            .or_else(|| result.pointer("/geninfo/infotexts"))
            .and_then(|v| v.as_array());
        let images = result
            .get("images")
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or_default();

        Ok(images
            .iter()
            .enumerate()
            .filter_map(|(i, path)| {
                Some(ResultImage {
                    path: path.as_str()?.to_string(),
                    infotext: infotexts
                        .and_then(|t| t.get(i))
                        .and_then(|t| t.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect())
    }

    // ---- single-task operations ----

    /// Rename, change the checkpoint or set named arguments of a task.
    pub async fn update(&self, id: &str, update: TaskUpdate) -> Result<Task, RunnerError> {
        let mut task = TaskRepo::require(self.pool(), id).await?;
        if task.status == TaskStatus::Running {
            return Err(RunnerError::AlreadyRunning(task.id));
        }

        if let Some(name) = update.name {
            task.display_name = Some(name);
        }
        if update.checkpoint.is_some() || !update.params.is_empty() {
            let mut args = codec::decode(&task.params, &task.script_params)?;
            if let Some(checkpoint) = update.checkpoint {
                args.overrides.checkpoint = Some(checkpoint);
            }
            let mut root = ParamValue::Map(std::mem::take(&mut args.named));
            for (path, value) in update.params {
                set_path(&mut root, &path, value)?;
            }
            if let ParamValue::Map(named) = root {
                args.named = named;
            }
            let encoded = codec::encode(&args)?;
            task.params = encoded.params;
            task.script_params = encoded.script_params;
        }

        let task = TaskRepo::update(self.pool(), &task).await?;
        tracing::info!(task_id = %id, "Task updated");
        Ok(task)
    }

    pub async fn reprioritize(&self, id: &str, target: MoveTarget) -> Result<i64, RunnerError> {
        let target = match target {
            MoveTarget::Top => Reprioritize::Top,
            MoveTarget::Bottom => Reprioritize::Bottom,
            MoveTarget::Over(other) => {
                let other = TaskRepo::require(self.pool(), &other).await?;
                Reprioritize::Exact(other.priority)
            }
        };
        let priority = TaskRepo::reprioritize(self.pool(), id, target).await?;
        tracing::info!(task_id = %id, ?target, priority, "Task moved");
        Ok(priority)
    }

    /// Copy a task as a new Pending task.
    pub async fn requeue(&self, id: &str) -> Result<Task, RunnerError> {
        let source = TaskRepo::require(self.pool(), id).await?;
        let name = source.display_name.as_deref().unwrap_or(source.id.as_str());
        let copy = NewTask {
            id: new_task_id(),
            external_id: source.external_id.clone(),
            external_callback: source.external_callback.clone(),
            upload_config: source.upload_config.clone(),
            display_name: Some(format!("{COPY_PREFIX}{name}")),
            kind: source.kind,
            params: source.params.clone(),
            script_params: source.script_params.clone(),
            priority: None,
        };
        self.runner.enqueue(&copy).await
    }

    /// Reset a Failed or Interrupted task to Pending in place.
    pub async fn retry(&self, id: &str) -> Result<(), RunnerError> {
        let task = TaskRepo::require(self.pool(), id).await?;
        if !matches!(task.status, TaskStatus::Failed | TaskStatus::Interrupted) {
            return Err(CoreError::Conflict(format!("Task is {}", task.status)).into());
        }
        TaskRepo::requeue_in_place(self.pool(), id, now_millis()).await?;
        self.runner.notify();
        tracing::info!(task_id = %id, "Task reset to pending");
        Ok(())
    }

    pub async fn retry_all_failed(&self) -> Result<u64, RunnerError> {
        let count = TaskRepo::requeue_all_failed(self.pool(), now_millis()).await?;
        if count > 0 {
            self.runner.notify();
        }
        tracing::info!(count, "Failed tasks reset to pending");
        Ok(count)
    }

    /// Delete a task, interrupting it first when it is running.
    ///
    /// Returns whether an interrupt was sent.
    pub async fn delete(&self, id: &str) -> Result<bool, RunnerError> {
        let interrupted = self.runner.interrupt(id).await;
        TaskRepo::delete(self.pool(), id).await?;
        tracing::info!(task_id = %id, interrupted, "Task deleted");
        Ok(interrupted)
    }

    pub async fn set_bookmarked(&self, id: &str, bookmarked: bool) -> Result<(), RunnerError> {
        TaskRepo::set_bookmarked(self.pool(), id, bookmarked).await?;
        Ok(())
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<(), RunnerError> {
        TaskRepo::rename(self.pool(), id, name).await?;
        Ok(())
    }

    // ---- bulk operations ----

    /// Delete every non-bookmarked Pending task.
    pub async fn clear_queue(&self) -> Result<u64, RunnerError> {
        let deleted = TaskRepo::delete_bulk(self.pool(), &[TaskStatus::Pending], None).await?;
        tracing::info!(deleted, "Queue cleared");
        Ok(deleted)
    }

    /// Delete every non-bookmarked terminal task.
    pub async fn clear_history(&self) -> Result<u64, RunnerError> {
        let deleted = TaskRepo::delete_bulk(self.pool(), &TaskStatus::TERMINAL, None).await?;
        tracing::info!(deleted, "History cleared");
        Ok(deleted)
    }

    /// Pending tasks in dequeue order, in portable form.
    pub async fn export(&self, page: Page) -> Result<Vec<ExportedTask>, RunnerError> {
        let tasks = TaskRepo::list(
            self.pool(),
            &TaskFilter::status(TaskStatus::Pending),
            page,
            ListOrder::Asc,
        )
        .await?;
        tasks.into_iter().map(|t| self.export_one(t)).collect()
    }

    fn export_one(&self, task: Task) -> Result<ExportedTask, RunnerError> {
        let params: serde_json::Value = serde_json::from_str(&task.params)
            .map_err(|e| codec::CodecError::CorruptPayload(format!("task {}: {e}", task.id)))?;

        let script_args = codec::decode(&task.params, &task.script_params)
            .ok()
            .and_then(|args| {
                let script = args.script_id.as_deref()?;
                self.scripts.get(script)?;
                let named = self.scripts.to_named(script, &args.positional).ok()?;
                ParamValue::Map(named).to_json().ok()
            });

        Ok(ExportedTask {
            id: Some(task.id),
            external_id: task.external_id,
            external_callback: task.external_callback,
            upload_config: task.upload_config,
            name: task.display_name,
            kind: task.kind,
            params,
            script_params: BASE64.encode(&task.script_params),
            script_args,
            priority: Some(task.priority),
            bookmarked: task.bookmarked,
            created_at: Some(task.created_at.timestamp_millis()),
        })
    }

    /// Upsert exported tasks by id as Pending tasks with no result and
    /// return how many were written.
    ///
    /// Every entry is validated before anything is written, and the rows
    /// are written in one transaction. An entry whose id is the task
    /// currently rendering is skipped.
    pub async fn import(&self, entries: Vec<ExportedTask>) -> Result<usize, RunnerError> {
        let tasks = entries
            .into_iter()
            .map(|entry| self.import_one(entry))
            .collect::<Result<Vec<_>, _>>()?;

        let written = TaskRepo::upsert_all(self.pool(), &tasks).await? as usize;
        if written > 0 {
            self.runner.notify();
        }
        if written < tasks.len() {
            tracing::warn!(skipped = tasks.len() - written, "Import skipped running tasks");
        }
        tracing::info!(count = written, "Tasks imported");
        Ok(written)
    }

    fn import_one(&self, entry: ExportedTask) -> Result<Task, RunnerError> {
        let mut params = entry.params.to_string();
        let mut script_params = BASE64
            .decode(entry.script_params.as_bytes())
            .map_err(|e| CoreError::Validation(format!("script_params is not base64: {e}")))?;

        // Validates the payload either way.
        let mut args = codec::decode(&params, &script_params)?;
        if let (Some(named), Some(script)) = (&entry.script_args, args.script_id.clone()) {
            let named = match ParamValue::from_json(named)? {
                ParamValue::Map(map) => map,
                _ => return Err(CoreError::Validation("script_args must be an object".into()).into()),
            };
            args.positional = self.scripts.to_positional(&script, &named)?;
            let encoded = codec::encode(&args)?;
            params = encoded.params;
            script_params = encoded.script_params;
        }

        let now = now_millis();
        Ok(Task {
            id: entry.id.filter(|id| !id.is_empty()).unwrap_or_else(new_task_id),
            external_id: entry.external_id,
            external_callback: entry.external_callback,
            upload_config: entry.upload_config,
            display_name: entry.name,
            kind: entry.kind,
            params,
            script_params,
            priority: entry.priority.unwrap_or(now),
            status: TaskStatus::Pending,
            result: None,
            bookmarked: entry.bookmarked,
            created_at: from_millis(entry.created_at.unwrap_or(now)),
            updated_at: from_millis(now),
        })
    }
}
