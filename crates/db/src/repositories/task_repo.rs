//! Repository for the `task` table.
//!
//! Pending tasks dequeue by ascending `priority`, ties broken by insertion
//! order (`rowid`). Bookmarked tasks are exempt from bulk deletion.

use renderq_core::task::TaskStatus;
use renderq_core::types::{now_millis, Timestamp};

use crate::models::task::{ListOrder, NewTask, Page, Reprioritize, Task, TaskFilter};
use crate::{DbError, DbPool};

/// Column list for `task` queries.
const COLUMNS: &str = "\
    id, external_id, external_callback, upload_config, display_name, \
    kind, params, script_params, priority, status, result, bookmarked, \
    created_at, updated_at";

/// Insert-or-replace by id. `created_at` is kept on conflict.
const UPSERT: &str = "\
    INSERT INTO task (id, external_id, external_callback, upload_config, display_name, \
                      kind, params, script_params, priority, status, result, bookmarked, \
                      created_at, updated_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
    ON CONFLICT(id) DO UPDATE SET \
        external_id = excluded.external_id, \
        external_callback = excluded.external_callback, \
        upload_config = excluded.upload_config, \
        display_name = excluded.display_name, \
        kind = excluded.kind, \
        params = excluded.params, \
        script_params = excluded.script_params, \
        priority = excluded.priority, \
        status = excluded.status, \
        result = excluded.result, \
        bookmarked = excluded.bookmarked, \
        updated_at = excluded.updated_at";

/// Maximum page size for task listing.
pub const MAX_LIMIT: i64 = 500;

/// Provides queue-ordered CRUD over tasks.
pub struct TaskRepo;

/// A value bound into a dynamically built statement.
enum Bind {
    Text(String),
    Int(i64),
}

/// Build the `WHERE` clause and its bind values for `filter`.
fn where_clause(filter: &TaskFilter) -> (String, Vec<Bind>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut binds = Vec::new();

    if let Some(kind) = filter.kind {
        conditions.push("kind = ?".into());
        binds.push(Bind::Text(kind.as_str().into()));
    }
    if !filter.statuses.is_empty() {
        let marks = vec!["?"; filter.statuses.len()].join(", ");
        conditions.push(format!("status IN ({marks})"));
        binds.extend(filter.statuses.iter().map(|s| Bind::Text(s.as_str().into())));
    }
    if let Some(bookmarked) = filter.bookmarked {
        conditions.push("bookmarked = ?".into());
        binds.push(Bind::Int(i64::from(bookmarked)));
    }
    if let Some(external_id) = &filter.external_id {
        conditions.push("external_id = ?".into());
        binds.push(Bind::Text(external_id.clone()));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (clause, binds)
}

fn ensure_affected(rows: u64, id: &str) -> Result<(), DbError> {
    if rows == 0 {
        return Err(DbError::NotFound(id.to_string()));
    }
    Ok(())
}

impl TaskRepo {
    /// Insert a new Pending task. Fails with `DuplicateId` if the id exists.
    pub async fn add(pool: &DbPool, input: &NewTask) -> Result<Task, DbError> {
        let now = now_millis();
        let query = format!(
            "INSERT INTO task (id, external_id, external_callback, upload_config, display_name, \
                               kind, params, script_params, priority, status, bookmarked, \
                               created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(&input.id)
            .bind(&input.external_id)
            .bind(&input.external_callback)
            .bind(input.upload_config.as_ref().map(|c| c.to_string()))
            .bind(&input.display_name)
            .bind(input.kind.as_str())
            .bind(&input.params)
            .bind(&input.script_params)
            .bind(input.priority.unwrap_or(now))
            .bind(TaskStatus::Pending.as_str())
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    DbError::DuplicateId(input.id.clone())
                }
                _ => DbError::Unavailable(e),
            })
    }

    pub async fn get(pool: &DbPool, id: &str) -> Result<Option<Task>, DbError> {
        let query = format!("SELECT {COLUMNS} FROM task WHERE id = ?");
        Ok(sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?)
    }

    /// Like [`TaskRepo::get`] but a missing task is `NotFound`.
    pub async fn require(pool: &DbPool, id: &str) -> Result<Task, DbError> {
        Self::get(pool, id)
            .await?
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    /// List tasks matching `filter`, ordered by priority.
    ///
    /// Unless the filter asks for bookmarked tasks only, bookmarked tasks
    /// sort after the rest.
    pub async fn list(
        pool: &DbPool,
        filter: &TaskFilter,
        page: Page,
        order: ListOrder,
    ) -> Result<Vec<Task>, DbError> {
        let (clause, binds) = where_clause(filter);
        let dir = order.as_sql();
        let bookmark_order = if filter.bookmarked == Some(true) {
            ""
        } else {
            "bookmarked ASC, "
        };
        let limit = page.limit.map(|l| l.clamp(0, MAX_LIMIT)).unwrap_or(-1);
        let offset = page.offset.unwrap_or(0).max(0);

        let query = format!(
            "SELECT {COLUMNS} FROM task {clause} \
             ORDER BY {bookmark_order}priority {dir}, rowid {dir} \
             LIMIT ? OFFSET ?"
        );
        let mut q = sqlx::query_as::<_, Task>(&query);
        for bind in binds {
            q = match bind {
                Bind::Text(v) => q.bind(v),
                Bind::Int(v) => q.bind(v),
            };
        }
        Ok(q.bind(limit).bind(offset).fetch_all(pool).await?)
    }

    pub async fn count(pool: &DbPool, filter: &TaskFilter) -> Result<i64, DbError> {
        let (clause, binds) = where_clause(filter);
        let query = format!("SELECT COUNT(*) FROM task {clause}");
        let mut q = sqlx::query_scalar::<_, i64>(&query);
        for bind in binds {
            q = match bind {
                Bind::Text(v) => q.bind(v),
                Bind::Int(v) => q.bind(v),
            };
        }
        Ok(q.fetch_one(pool).await?)
    }

    /// Number of Pending tasks that dequeue before `id`.
    ///
    /// `NotFound` if the task is absent or not Pending.
    pub async fn position_of(pool: &DbPool, id: &str) -> Result<i64, DbError> {
        let position: Option<i64> = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM task AS other \
                     WHERE other.status = ?1 \
                       AND (other.priority < t.priority \
                            OR (other.priority = t.priority AND other.rowid < t.rowid))) \
             FROM task AS t WHERE t.id = ?2 AND t.status = ?1",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(id)
        .fetch_optional(pool)
        .await?;
        position.ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    /// Replace every mutable column of `task` by id.
    pub async fn update(pool: &DbPool, task: &Task) -> Result<Task, DbError> {
        let query = format!(
            "UPDATE task SET external_id = ?, external_callback = ?, upload_config = ?, \
                             display_name = ?, kind = ?, params = ?, script_params = ?, \
                             priority = ?, status = ?, result = ?, bookmarked = ?, \
                             updated_at = ? \
             WHERE id = ? \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(&task.external_id)
            .bind(&task.external_callback)
            .bind(task.upload_config.as_ref().map(|c| c.to_string()))
            .bind(&task.display_name)
            .bind(task.kind.as_str())
            .bind(&task.params)
            .bind(&task.script_params)
            .bind(task.priority)
            .bind(task.status.as_str())
            .bind(&task.result)
            .bind(task.bookmarked)
            .bind(now_millis())
            .bind(&task.id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DbError::NotFound(task.id.clone()))
    }

    /// Insert `task` or, if its id exists, replace the stored row.
    pub async fn upsert(pool: &DbPool, task: &Task) -> Result<Task, DbError> {
        let now = now_millis();
        let query = format!("{UPSERT} RETURNING {COLUMNS}");
        Ok(sqlx::query_as::<_, Task>(&query)
            .bind(&task.id)
            .bind(&task.external_id)
            .bind(&task.external_callback)
            .bind(task.upload_config.as_ref().map(|c| c.to_string()))
            .bind(&task.display_name)
            .bind(task.kind.as_str())
            .bind(&task.params)
            .bind(&task.script_params)
            .bind(task.priority)
            .bind(task.status.as_str())
            .bind(&task.result)
            .bind(task.bookmarked)
            .bind(task.created_at.timestamp_millis())
            .bind(now)
            .fetch_one(pool)
            .await?)
    }

    /// Upsert `tasks` in one transaction and return how many rows were
    /// written.
    ///
    /// A row that is currently Running is left untouched. Any failure rolls
    /// back the whole batch.
    pub async fn upsert_all(pool: &DbPool, tasks: &[Task]) -> Result<u64, DbError> {
        let query = format!("{UPSERT} WHERE task.status <> ?");
        let now = now_millis();
        let mut written = 0;

        let mut tx = pool.begin().await?;
        for task in tasks {
            written += sqlx::query(&query)
                .bind(&task.id)
                .bind(&task.external_id)
                .bind(&task.external_callback)
                .bind(task.upload_config.as_ref().map(|c| c.to_string()))
                .bind(&task.display_name)
                .bind(task.kind.as_str())
                .bind(&task.params)
                .bind(&task.script_params)
                .bind(task.priority)
                .bind(task.status.as_str())
                .bind(&task.result)
                .bind(task.bookmarked)
                .bind(task.created_at.timestamp_millis())
                .bind(now)
                .bind(TaskStatus::Running.as_str())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    /// Move a task within the queue and return its new priority.
    ///
    /// `Top` and `Bottom` are single statements. `Exact` shifts every task
    /// at or above the target up by one, then assigns the target, inside one
    /// transaction whose first statement is a write, so SQLite takes the
    /// write lock before anything is read and concurrent moves serialize.
    pub async fn reprioritize(
        pool: &DbPool,
        id: &str,
        target: Reprioritize,
    ) -> Result<i64, DbError> {
        let now = now_millis();
        let priority: Option<i64> = match target {
            Reprioritize::Top => {
                sqlx::query_scalar(
                    "UPDATE task SET \
                         priority = (SELECT COALESCE(MIN(priority), ?1) - 1 FROM task WHERE status = ?2), \
                         updated_at = ?1 \
                     WHERE id = ?3 \
                     RETURNING priority",
                )
                .bind(now)
                .bind(TaskStatus::Pending.as_str())
                .bind(id)
                .fetch_optional(pool)
                .await?
            }
            Reprioritize::Bottom => {
                sqlx::query_scalar(
                    "UPDATE task SET priority = ?1, updated_at = ?1 WHERE id = ?2 RETURNING priority",
                )
                .bind(now)
                .bind(id)
                .fetch_optional(pool)
                .await?
            }
            Reprioritize::Exact(p) => {
                let mut tx = pool.begin().await?;
                sqlx::query("UPDATE task SET priority = priority + 1 WHERE priority >= ?1 AND id <> ?2")
                    .bind(p)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                let assigned: Option<i64> = sqlx::query_scalar(
                    "UPDATE task SET priority = ?1, updated_at = ?2 WHERE id = ?3 RETURNING priority",
                )
                .bind(p)
                .bind(now)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
                if assigned.is_some() {
                    tx.commit().await?;
                } else {
                    tx.rollback().await?;
                }
                assigned
            }
        };
        priority.ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    /// Set `status` and `result` together.
    ///
    /// Callers moving a task to Pending or Running pass `None` so no stale
    /// result survives.
    pub async fn set_status(
        pool: &DbPool,
        id: &str,
        status: TaskStatus,
        result: Option<&str>,
    ) -> Result<(), DbError> {
        let done = sqlx::query("UPDATE task SET status = ?, result = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(result)
            .bind(now_millis())
            .bind(id)
            .execute(pool)
            .await?;
        ensure_affected(done.rows_affected(), id)
    }

    /// Reset a task to Pending in place with a fresh priority.
    pub async fn requeue_in_place(pool: &DbPool, id: &str, priority: i64) -> Result<(), DbError> {
        let done = sqlx::query(
            "UPDATE task SET status = ?, result = NULL, priority = ?, updated_at = ? WHERE id = ?",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(priority)
        .bind(now_millis())
        .bind(id)
        .execute(pool)
        .await?;
        ensure_affected(done.rows_affected(), id)
    }

    /// Reset every Failed task to Pending. Returns the number reset.
    pub async fn requeue_all_failed(pool: &DbPool, priority: i64) -> Result<u64, DbError> {
        let done = sqlx::query(
            "UPDATE task SET status = ?1, result = NULL, priority = ?2, updated_at = ?3 \
             WHERE status = ?4",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(priority)
        .bind(now_millis())
        .bind(TaskStatus::Failed.as_str())
        .execute(pool)
        .await?;
        Ok(done.rows_affected())
    }

    pub async fn set_bookmarked(pool: &DbPool, id: &str, bookmarked: bool) -> Result<(), DbError> {
        let done = sqlx::query("UPDATE task SET bookmarked = ?, updated_at = ? WHERE id = ?")
            .bind(bookmarked)
            .bind(now_millis())
            .bind(id)
            .execute(pool)
            .await?;
        ensure_affected(done.rows_affected(), id)
    }

    pub async fn rename(pool: &DbPool, id: &str, name: &str) -> Result<(), DbError> {
        let done = sqlx::query("UPDATE task SET display_name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(now_millis())
            .bind(id)
            .execute(pool)
            .await?;
        ensure_affected(done.rows_affected(), id)
    }

    pub async fn delete(pool: &DbPool, id: &str) -> Result<(), DbError> {
        let done = sqlx::query("DELETE FROM task WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        ensure_affected(done.rows_affected(), id)
    }

    /// Delete every non-bookmarked task whose status is in `statuses` and,
    /// when `before` is set, that was created before it.
    ///
    /// Returns the number of rows deleted.
    pub async fn delete_bulk(
        pool: &DbPool,
        statuses: &[TaskStatus],
        before: Option<Timestamp>,
    ) -> Result<u64, DbError> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let marks = vec!["?"; statuses.len()].join(", ");
        let age = if before.is_some() { "AND created_at < ?" } else { "" };
        let query = format!("DELETE FROM task WHERE bookmarked = 0 AND status IN ({marks}) {age}");

        let mut q = sqlx::query(&query);
        for status in statuses {
            q = q.bind(status.as_str());
        }
        if let Some(before) = before {
            q = q.bind(before.timestamp_millis());
        }
        Ok(q.execute(pool).await?.rows_affected())
    }

    /// The Pending task that dequeues next, if any.
    pub async fn next_pending(pool: &DbPool) -> Result<Option<Task>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM task WHERE status = ? \
             ORDER BY priority ASC, rowid ASC LIMIT 1"
        );
        Ok(sqlx::query_as::<_, Task>(&query)
            .bind(TaskStatus::Pending.as_str())
            .fetch_optional(pool)
            .await?)
    }

    /// Mark tasks left Running by a previous process as Interrupted.
    pub async fn interrupt_stale_running(pool: &DbPool) -> Result<u64, DbError> {
        let done = sqlx::query("UPDATE task SET status = ?, updated_at = ? WHERE status = ?")
            .bind(TaskStatus::Interrupted.as_str())
            .bind(now_millis())
            .bind(TaskStatus::Running.as_str())
            .execute(pool)
            .await?;
        Ok(done.rows_affected())
    }
}
