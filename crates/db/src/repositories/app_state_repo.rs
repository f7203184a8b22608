//! Repository for the `app_state` key/value table.

use crate::models::app_state::{QueueState, QUEUE_STATE_KEY, VERSION_KEY};
use crate::{DbError, DbPool};

pub struct AppStateRepo;

impl AppStateRepo {
    pub async fn get(pool: &DbPool, key: &str) -> Result<Option<String>, DbError> {
        Ok(sqlx::query_scalar("SELECT value FROM app_state WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?)
    }

    pub async fn set(pool: &DbPool, key: &str, value: &str) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO app_state (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn schema_version(pool: &DbPool) -> Result<Option<String>, DbError> {
        Self::get(pool, VERSION_KEY).await
    }

    /// Persisted queue state. A missing or unreadable value means running.
    pub async fn queue_state(pool: &DbPool) -> Result<QueueState, DbError> {
        let raw = Self::get(pool, QUEUE_STATE_KEY).await?;
        Ok(raw
            .and_then(|v| v.parse().ok())
            .unwrap_or(QueueState::Running))
    }

    pub async fn set_queue_state(pool: &DbPool, state: QueueState) -> Result<(), DbError> {
        Self::set(pool, QUEUE_STATE_KEY, state.as_str()).await
    }
}
