//! Task row, insert DTO and listing filters.

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use renderq_core::task::{TaskKind, TaskStatus};
use renderq_core::types::{from_millis, TaskId, Timestamp};

/// A row from the `task` table.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub external_id: Option<String>,
    pub external_callback: Option<String>,
    /// Object-storage destination for result artifacts, passed through
    /// untouched to the notification layer.
    pub upload_config: Option<serde_json::Value>,
    pub display_name: Option<String>,
    pub kind: TaskKind,
    /// Encoded named arguments.
    pub params: String,
    /// Encoded positional arguments (compressed).
    #[serde(skip)]
    pub script_params: Vec<u8>,
    pub priority: i64,
    pub status: TaskStatus,
    /// Serialized outcome; only set once the task reached Done or Failed.
    pub result: Option<String>,
    pub bookmarked: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl<'r> FromRow<'r, SqliteRow> for Task {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        let upload_config: Option<String> = row.try_get("upload_config")?;

        Ok(Self {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            external_callback: row.try_get("external_callback")?,
            upload_config: upload_config
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|e| decode_err("upload_config", e))?,
            display_name: row.try_get("display_name")?,
            kind: kind.parse().map_err(|e| decode_err("kind", e))?,
            params: row.try_get("params")?,
            script_params: row.try_get("script_params")?,
            priority: row.try_get("priority")?,
            status: status.parse().map_err(|e| decode_err("status", e))?,
            result: row.try_get("result")?,
            bookmarked: row.try_get("bookmarked")?,
            created_at: from_millis(row.try_get("created_at")?),
            updated_at: from_millis(row.try_get("updated_at")?),
        })
    }
}

fn decode_err<E>(column: &str, err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    }
}

/// DTO for inserting a new Pending task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: TaskId,
    pub external_id: Option<String>,
    pub external_callback: Option<String>,
    pub upload_config: Option<serde_json::Value>,
    pub display_name: Option<String>,
    pub kind: TaskKind,
    pub params: String,
    pub script_params: Vec<u8>,
    /// Defaults to the current time in milliseconds.
    pub priority: Option<i64>,
}

impl NewTask {
    /// A bare task with only the required fields set.
    pub fn new(id: TaskId, kind: TaskKind, params: String, script_params: Vec<u8>) -> Self {
        Self {
            id,
            external_id: None,
            external_callback: None,
            upload_config: None,
            display_name: None,
            kind,
            params,
            script_params,
            priority: None,
        }
    }
}

/// Filter for [`TaskRepo::list`](crate::repositories::TaskRepo::list) and
/// [`TaskRepo::count`](crate::repositories::TaskRepo::count).
///
/// Unset fields do not constrain the result. An empty `statuses` matches
/// every status.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub kind: Option<TaskKind>,
    pub statuses: Vec<TaskStatus>,
    /// `Some(true)` lists only bookmarked tasks. Otherwise bookmarked tasks
    /// sort after the rest.
    pub bookmarked: Option<bool>,
    pub external_id: Option<String>,
}

impl TaskFilter {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    pub fn statuses(statuses: &[TaskStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }
}

/// Priority ordering of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOrder {
    #[default]
    Asc,
    Desc,
}

impl ListOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            ListOrder::Asc => "ASC",
            ListOrder::Desc => "DESC",
        }
    }
}

/// Paging window. `None` limit means every matching row.
#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Where [`TaskRepo::reprioritize`](crate::repositories::TaskRepo::reprioritize)
/// moves a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reprioritize {
    /// Ahead of every Pending task.
    Top,
    /// Behind every task queued so far (priority = now).
    Bottom,
    /// Exactly this priority; tasks at or above it shift up by one.
    Exact(i64),
}
