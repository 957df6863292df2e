//! Stratrack Server
//!
//! Hosts the HTTP API and the backtest worker in one process. The two sides
//! share only the task queue and the database; the worker is the sole
//! consumer of the queue and executes one backtest at a time.

use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Instant;
use stratrack::core::http::{start_server, AppState, HealthStatus};
use stratrack::core::queue::TaskQueue;
use stratrack::core::worker::BacktestWorker;
use stratrack::db::PostgresDatabase;
use stratrack::jobs::context::JobContext;
use stratrack::jobs::executor::{BacktestExecutor, ExecutorConfig};
use stratrack::logging;
use stratrack::metrics::Metrics;
use stratrack::services::market_data::DatabaseMarketDataProvider;
use tokio::signal;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env if present
    dotenv().ok();

    // Initialize logging based on environment
    logging::init_logging();

    let port = stratrack::config::get_port();
    let env = stratrack::config::get_environment();
    let executor_config = ExecutorConfig::from_env();

    info!("Starting Stratrack Server");
    info!(environment = %env, "Environment");
    info!(port = port, "HTTP Server: http://0.0.0.0:{}", port);
    info!(
        runtime = %executor_config.runtime,
        timeout_secs = executor_config.timeout.as_secs(),
        "Sandbox: {} with a {}s wall-clock budget",
        executor_config.runtime,
        executor_config.timeout.as_secs()
    );

    // Initialize metrics
    let metrics = Arc::new(Metrics::new()?);

    // Initialize PostgreSQL (required - it is the single source of truth)
    info!("Initializing PostgreSQL connection...");
    let database = match PostgresDatabase::new().await {
        Ok(db) => {
            info!("PostgreSQL connected");
            metrics.database_connected.set(1.0);
            Arc::new(db)
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to PostgreSQL");
            return Err(format!("PostgreSQL connection required: {}", e).into());
        }
    };

    // The task queue is constructed here and handed to both sides
    // explicitly; nothing looks it up through ambient state.
    let queue = Arc::new(TaskQueue::new());

    let provider = Arc::new(DatabaseMarketDataProvider::new(database.clone()));
    let job_context = Arc::new(JobContext::new(
        database.clone(),
        provider,
        Some(metrics.clone()),
    ));
    let executor = Arc::new(BacktestExecutor::new(job_context, executor_config));

    // Start the worker loop (sole queue consumer, one job at a time)
    info!("Starting backtest worker...");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = BacktestWorker::new(queue.clone(), executor, shutdown_rx);
    let worker_handle = tokio::spawn(worker.run());

    // Start HTTP server
    let state = AppState {
        health: Arc::new(RwLock::new(HealthStatus::default())),
        metrics: metrics.clone(),
        start_time: Arc::new(Instant::now()),
        database,
        queue,
    };
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, state).await {
            error!(error = %e, "HTTP server error");
        }
    });

    // Graceful shutdown: the worker checks the signal between dequeues, so
    // an in-flight backtest runs to completion (or its timeout) first.
    info!("Server started, waiting for shutdown signal...");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutting down...");
            let _ = shutdown_tx.send(true);
            if let Err(e) = worker_handle.await {
                error!(error = %e, "Worker task failed during shutdown");
            }
            server_handle.abort();
            info!("Server stopped");
        }
        _ = &mut server_handle => {
            error!("HTTP server stopped unexpectedly");
            let _ = shutdown_tx.send(true);
            let _ = worker_handle.await;
        }
    }

    Ok(())
}
