//! HTTP endpoint server using Axum

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};
use uuid::Uuid;

use crate::core::queue::TaskQueue;
use crate::db::Database;
use crate::metrics::Metrics;
use crate::models::backtest::{BacktestRequest, BacktestRun, BacktestStatusResponse};
use crate::models::market::Candle;
use crate::models::strategy::{CreateStrategyVersionRequest, StrategyVersion};

#[derive(Clone)]
pub struct AppState {
    pub health: Arc<RwLock<HealthStatus>>,
    pub metrics: Arc<Metrics>,
    pub start_time: Arc<Instant>,
    pub database: Arc<dyn Database>,
    pub queue: Arc<TaskQueue>,
}

#[derive(Clone, Debug)]
pub struct HealthStatus {
    pub status: String,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let health = state.health.read().await;
    let uptime_seconds = state.start_time.elapsed().as_secs();
    Ok(Json(json!({
        "status": health.status,
        "uptime_seconds": uptime_seconds,
        "service": "stratrack-backtest-service"
    })))
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .export()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Middleware to track HTTP request metrics
async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.metrics.http_requests_in_flight.inc();

    let response = next.run(request).await;
    let status = response.status();
    let duration = start.elapsed();

    state.metrics.http_requests_in_flight.dec();
    state.metrics.http_requests_total.inc();
    state
        .metrics
        .http_request_duration_seconds
        .observe(duration.as_secs_f64());

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            status = %status,
            duration_ms = duration.as_millis(),
            "HTTP request error"
        );
    }

    response
}

/// Submit a backtest: create the pending record and enqueue its id.
///
/// The request is validated at this boundary (unknown strategy version is
/// rejected synchronously); execution itself is asynchronous and failures
/// there are observable only through the status/detail endpoints.
async fn submit_backtest(
    State(state): State<AppState>,
    Json(request): Json<BacktestRequest>,
) -> Result<Json<BacktestRun>, StatusCode> {
    let version = state
        .database
        .get_strategy_version(request.strategy_version_id)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to load strategy version for submission");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    if version.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    let run = BacktestRun::from_request(request);
    state.database.create_backtest_run(&run).await.map_err(|e| {
        error!(error = %e, "Failed to create backtest run");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    state.queue.enqueue(run.id);
    state.metrics.backtests_submitted_total.inc();
    state.metrics.queue_depth.inc();

    info!(run_id = %run.id, "Submitted backtest {}", run.id);
    Ok(Json(run))
}

/// Get full backtest run detail by id
async fn get_backtest(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BacktestRun>, StatusCode> {
    let run = state.database.get_backtest_run(id).await.map_err(|e| {
        error!(error = %e, run_id = %id, "Failed to load backtest run");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    run.map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Get the status projection of a backtest run
async fn get_backtest_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BacktestStatusResponse>, StatusCode> {
    let status = state.database.get_backtest_status(id).await.map_err(|e| {
        error!(error = %e, run_id = %id, "Failed to load backtest status");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    status
        .map(|status| Json(BacktestStatusResponse { id, status }))
        .ok_or(StatusCode::NOT_FOUND)
}

/// Create a strategy version (minimal surface; full strategy management
/// lives outside this service)
async fn create_strategy_version(
    State(state): State<AppState>,
    Json(request): Json<CreateStrategyVersionRequest>,
) -> Result<Json<StrategyVersion>, StatusCode> {
    let version = StrategyVersion::from_request(request);
    state
        .database
        .create_strategy_version(&version)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create strategy version");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(version))
}

/// Get a strategy version by id
async fn get_strategy_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StrategyVersion>, StatusCode> {
    let version = state.database.get_strategy_version(id).await.map_err(|e| {
        error!(error = %e, version_id = %id, "Failed to load strategy version");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    version.map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
struct InsertCandlesRequest {
    #[serde(rename = "dataSourceId")]
    data_source_id: Uuid,
    timeframe: String,
    candles: Vec<Candle>,
}

/// Bulk insert candle rows for a data source (seeding surface for the
/// market data provider)
async fn insert_candles(
    State(state): State<AppState>,
    Json(request): Json<InsertCandlesRequest>,
) -> Result<Json<Value>, StatusCode> {
    let inserted = state
        .database
        .insert_candles(request.data_source_id, &request.timeframe, &request.candles)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert candles");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(json!({ "inserted": inserted })))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/backtests", post(submit_backtest))
        .route("/api/backtests/{id}", get(get_backtest))
        .route("/api/backtests/{id}/status", get(get_backtest_status))
        .route("/api/strategy-versions", post(create_strategy_version))
        .route("/api/strategy-versions/{id}", get(get_strategy_version))
        .route("/api/candles", post(insert_candles))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn start_server(
    port: u16,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!(port = port, "HTTP server listening on port {}", port);
    info!(
        "Metrics endpoint available at http://0.0.0.0:{}/metrics",
        port
    );
    axum::serve(listener, app).await?;

    Ok(())
}
