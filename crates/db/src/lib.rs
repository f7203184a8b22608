//! Durable task store for the render queue.
//!
//! SQLite via sqlx. Every repository call runs its own short statement or
//! transaction; nothing holds a connection between calls.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

pub mod models;
pub mod repositories;

/// Shared database pool type.
pub type DbPool = SqlitePool;

/// Schema version written to `app_state.version` after migrations.
pub const SCHEMA_VERSION: &str = "2";

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Columns added after the first schema version, with their declarations.
///
/// Checked on every startup and added when missing.
const ADDITIVE_COLUMNS: [(&str, &str); 5] = [
    ("external_id", "TEXT"),
    ("external_callback", "TEXT"),
    ("upload_config", "TEXT"),
    ("display_name", "TEXT"),
    ("bookmarked", "INTEGER NOT NULL DEFAULT 0"),
];

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Store-level failures.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Task {0} not found")]
    NotFound(String),

    #[error("Task {0} already exists")]
    DuplicateId(String),

    /// The database could not be reached or rejected the statement.
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Open (or create) the database at `database_url`, e.g. `sqlite://renderq.db`.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Open a private in-memory database.
///
/// Pinned to one connection that never expires, since every SQLite memory
/// connection is its own database.
pub async fn create_memory_pool() -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

/// Verify the pool can execute a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Migrations
// ---------------------------------------------------------------------------

/// Bring the schema up to date. Idempotent and never destructive.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS task ( \
             id TEXT PRIMARY KEY NOT NULL, \
             kind TEXT NOT NULL, \
             params TEXT NOT NULL, \
             script_params BLOB NOT NULL, \
             priority INTEGER NOT NULL, \
             status TEXT NOT NULL DEFAULT 'pending', \
             result TEXT, \
             created_at INTEGER NOT NULL, \
             updated_at INTEGER NOT NULL \
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS app_state ( \
             key TEXT PRIMARY KEY NOT NULL, \
             value TEXT NOT NULL \
         )",
    )
    .execute(pool)
    .await?;

    ensure_task_columns(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_status_priority ON task(status, priority)")
        .execute(pool)
        .await?;

    sqlx::query(
        "INSERT INTO app_state (key, value) VALUES ('version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(SCHEMA_VERSION)
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO app_state (key, value) VALUES ('queue_state', 'running')")
        .execute(pool)
        .await?;

    Ok(())
}

/// Add any [`ADDITIVE_COLUMNS`] the `task` table is missing.
async fn ensure_task_columns(pool: &DbPool) -> Result<(), sqlx::Error> {
    let rows = sqlx::query("PRAGMA table_info(task)").fetch_all(pool).await?;
    let existing: Vec<String> = rows
        .iter()
        .filter_map(|row| row.try_get::<String, _>("name").ok())
        .collect();

    for (name, decl) in ADDITIVE_COLUMNS {
        if existing.iter().any(|c| c == name) {
            continue;
        }
        sqlx::query(&format!("ALTER TABLE task ADD COLUMN {name} {decl}"))
            .execute(pool)
            .await?;
        tracing::info!(column = name, "Added missing task column");
    }
    Ok(())
}
