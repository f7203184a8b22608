use renderq_core::task::TaskKind;
use renderq_core::types::new_task_id;
use renderq_db::models::task::{NewTask, Task};
use renderq_db::repositories::TaskRepo;
use renderq_db::DbPool;

/// Fresh in-memory database with the current schema.
pub async fn test_pool() -> DbPool {
    let pool = renderq_db::create_memory_pool().await.unwrap();
    renderq_db::run_migrations(&pool).await.unwrap();
    pool
}

/// Insert a text-to-image task at an explicit priority.
pub async fn add_task(pool: &DbPool, priority: i64) -> Task {
    let mut input = NewTask::new(new_task_id(), TaskKind::GenerateFromText, "{}".into(), Vec::new());
    input.priority = Some(priority);
    TaskRepo::add(pool, &input).await.unwrap()
}
