use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use renderq_api::config::ServerConfig;
use renderq_api::router::build_app_router;
use renderq_api::state::AppState;
use renderq_core::codec::ScriptRegistry;
use renderq_engine::HttpRenderEngine;
use renderq_events::{CallbackNotifier, TaskHooks};
use renderq_worker::config::RunnerConfig;
use renderq_worker::control::QueueService;
use renderq_worker::TaskRunner;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "renderq_api=debug,renderq_worker=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let runner_config = RunnerConfig::from_env().expect("Invalid runner configuration");
    let engine_url = runner_config
        .engine_url
        .clone()
        .expect("RENDERQ_ENGINE_URL must be set");
    tracing::info!(host = %config.host, port = %config.port, %engine_url, "Loaded configuration");

    // --- Database ---
    let pool = renderq_db::create_pool(&config.database_url)
        .await
        .expect("Failed to open database");
    renderq_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    renderq_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!(database_url = %config.database_url, "Database ready");

    // --- Runner ---
    let mut hooks = TaskHooks::new(runner_config.callback_timeout);
    hooks.register(Arc::new(
        CallbackNotifier::new().expect("Failed to build HTTP client"),
    ));
    let engine = Arc::new(HttpRenderEngine::new(
        engine_url,
        runner_config.output_dir.clone(),
    ));

    let shutdown = CancellationToken::new();
    let runner = TaskRunner::start(pool.clone(), engine, hooks, runner_config, shutdown.clone())
        .await
        .expect("Failed to start task runner");
    let worker_handle = tokio::spawn(runner.clone().run());

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        queue: QueueService::new(runner.clone(), Arc::new(ScriptRegistry::new())),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping worker");
    shutdown.cancel();
    if let Some(id) = runner.current_task_id().await {
        tracing::info!(task_id = %id, "Waiting for running task to finish");
    }
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(drain, worker_handle).await.is_err() {
        tracing::warn!(timeout_secs = config.shutdown_timeout_secs, "Worker did not stop in time");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT, SIGTERM (on Unix) or the runner's own shutdown token,
/// which the `stop` completion action cancels.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
        () = shutdown.cancelled() => {
            tracing::info!("Queue completion action requested shutdown");
        }
    }
}
