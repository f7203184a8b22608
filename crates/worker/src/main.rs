use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use renderq_engine::HttpRenderEngine;
use renderq_events::{CallbackNotifier, TaskHooks};
use renderq_worker::config::RunnerConfig;
use renderq_worker::TaskRunner;

/// Headless worker: drains the queue without serving the HTTP API.
#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "renderq_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RunnerConfig::from_env().expect("Invalid runner configuration");
    let engine_url = config
        .engine_url
        .clone()
        .expect("RENDERQ_ENGINE_URL must be set");

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://renderq.db".into());
    let pool = renderq_db::create_pool(&database_url)
        .await
        .expect("Failed to open database");
    renderq_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!(%database_url, "Database ready");

    let mut hooks = TaskHooks::new(config.callback_timeout);
    hooks.register(Arc::new(
        CallbackNotifier::new().expect("Failed to build HTTP client"),
    ));

    let engine = Arc::new(HttpRenderEngine::new(engine_url, config.output_dir.clone()));
    let shutdown = CancellationToken::new();
    let runner = TaskRunner::start(pool, engine, hooks, config, shutdown.clone())
        .await
        .expect("Failed to start task runner");

    let worker = tokio::spawn(runner.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, stopping worker");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
    let _ = worker.await;
    tracing::info!("Worker stopped");
}
