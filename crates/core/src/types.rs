/// All task identifiers are opaque strings (UUIDs for locally created tasks).
pub type TaskId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current wall-clock time in Unix milliseconds.
///
/// Used both for `created_at`/`updated_at` and as the default priority of
/// freshly submitted tasks.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert stored Unix milliseconds back into a [`Timestamp`].
pub fn from_millis(ms: i64) -> Timestamp {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Generate a fresh task id.
pub fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}
