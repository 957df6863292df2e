//! Shared test utilities for integration tests
//!
//! Provides an in-memory `Database`, canned market data providers and shell
//! scripts standing in for strategy programs so subprocess scenarios run
//! without PostgreSQL or Python.

use axum_test::TestServer;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stratrack::core::http::{create_router, AppState, HealthStatus};
use stratrack::core::queue::TaskQueue;
use stratrack::core::worker::BacktestWorker;
use stratrack::db::Database;
use stratrack::jobs::context::JobContext;
use stratrack::jobs::executor::{BacktestExecutor, ExecutorConfig};
use stratrack::metrics::Metrics;
use stratrack::models::backtest::{BacktestRequest, BacktestRun, BacktestStatus};
use stratrack::models::market::Candle;
use stratrack::models::strategy::StrategyVersion;
use stratrack::services::market_data::MarketDataProvider;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

/// Strategy programs for the sandbox, run with `sh <file> <workspace>`

pub const SCRIPT_SUCCESS: &str = r#"cd "$1"
printf '{"final_value": 105000}' > result.json
printf '[]' > trades.json
printf '{}' > chart_data.json
"#;

pub const SCRIPT_SLEEP: &str = "sleep 5\n";

pub const SCRIPT_STDERR_EXIT: &str = r#"echo "strategy blew up" >&2
exit 3
"#;

pub const SCRIPT_MISSING_CHART: &str = r#"cd "$1"
printf '{"final_value": 99000}' > result.json
printf '[]' > trades.json
"#;

pub const SCRIPT_BAD_JSON: &str = r#"cd "$1"
printf 'not-json' > result.json
printf '[]' > trades.json
printf '{}' > chart_data.json
"#;

pub const SCRIPT_COPY_PARAMS: &str = r#"cd "$1"
cp params.json result.json
printf '[]' > trades.json
printf '{}' > chart_data.json
"#;

pub fn sample_candles(count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let timestamp = Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .unwrap()
                + chrono::Duration::minutes(i as i64);
            Candle::new(timestamp, 1.0, 1.1, 0.9, 1.05, 1000.0)
        })
        .collect()
}

/// In-memory `Database` for tests. Mirrors the guard semantics of the
/// PostgreSQL implementation and additionally records every observed status
/// transition per run so tests can assert the full sequence.
#[derive(Default)]
pub struct MemoryDatabase {
    runs: Mutex<HashMap<Uuid, BacktestRun>>,
    versions: Mutex<HashMap<Uuid, StrategyVersion>>,
    candles: Mutex<Vec<(Uuid, String, Candle)>>,
    history: Mutex<HashMap<Uuid, Vec<BacktestStatus>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_history(&self, id: Uuid) -> Vec<BacktestStatus> {
        self.history
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn candle_count(&self) -> usize {
        self.candles.lock().unwrap().len()
    }

    fn record_status(&self, id: Uuid, status: BacktestStatus) {
        self.history.lock().unwrap().entry(id).or_default().push(status);
    }
}

#[async_trait::async_trait]
impl Database for MemoryDatabase {
    async fn create_backtest_run(
        &self,
        run: &BacktestRun,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.runs.lock().unwrap().insert(run.id, run.clone());
        self.record_status(run.id, run.status);
        Ok(())
    }

    async fn get_backtest_run(
        &self,
        id: Uuid,
    ) -> Result<Option<BacktestRun>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.runs.lock().unwrap().get(&id).cloned())
    }

    async fn get_backtest_status(
        &self,
        id: Uuid,
    ) -> Result<Option<BacktestStatus>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.runs.lock().unwrap().get(&id).map(|r| r.status))
    }

    async fn mark_backtest_running(
        &self,
        id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.get_mut(&id) {
            if run.status == BacktestStatus::Pending {
                run.status = BacktestStatus::Running;
                run.updated_at = Utc::now();
                drop(runs);
                self.record_status(id, BacktestStatus::Running);
            }
        }
        Ok(())
    }

    async fn complete_backtest_success(
        &self,
        id: Uuid,
        result_summary: Value,
        execution_log: Value,
        chart_data: Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.get_mut(&id) {
            if !run.status.is_terminal() {
                let now = Utc::now();
                run.status = BacktestStatus::Success;
                run.result_summary = Some(result_summary);
                run.execution_log = Some(execution_log);
                run.chart_data = Some(chart_data);
                run.error_message = None;
                run.completed_at = Some(now);
                run.updated_at = now;
                drop(runs);
                self.record_status(id, BacktestStatus::Success);
            }
        }
        Ok(())
    }

    async fn complete_backtest_failure(
        &self,
        id: Uuid,
        error_message: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.get_mut(&id) {
            if !run.status.is_terminal() {
                let now = Utc::now();
                run.status = BacktestStatus::Failed;
                run.result_summary = None;
                run.execution_log = None;
                run.chart_data = None;
                run.error_message = Some(error_message.to_string());
                run.completed_at = Some(now);
                run.updated_at = now;
                drop(runs);
                self.record_status(id, BacktestStatus::Failed);
            }
        }
        Ok(())
    }

    async fn create_strategy_version(
        &self,
        version: &StrategyVersion,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.versions
            .lock()
            .unwrap()
            .insert(version.id, version.clone());
        Ok(())
    }

    async fn get_strategy_version(
        &self,
        id: Uuid,
    ) -> Result<Option<StrategyVersion>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.versions.lock().unwrap().get(&id).cloned())
    }

    async fn insert_candles(
        &self,
        data_source_id: Uuid,
        timeframe: &str,
        candles: &[Candle],
    ) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        let mut stored = self.candles.lock().unwrap();
        for candle in candles {
            stored.push((data_source_id, timeframe.to_string(), candle.clone()));
        }
        Ok(candles.len() as u64)
    }

    async fn get_candles(
        &self,
        data_source_id: Uuid,
        timeframe: &str,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
    ) -> Result<Vec<Candle>, Box<dyn std::error::Error + Send + Sync>> {
        let stored = self.candles.lock().unwrap();
        let mut matching: Vec<Candle> = stored
            .iter()
            .filter(|(source, tf, candle)| {
                *source == data_source_id
                    && tf == timeframe
                    && candle.timestamp >= start
                    && candle.timestamp <= end
            })
            .map(|(_, _, candle)| candle.clone())
            .collect();
        matching.sort_by_key(|c| c.timestamp);
        Ok(matching)
    }
}

/// Provider returning a fixed series regardless of the requested source
pub struct StaticMarketDataProvider {
    candles: Vec<Candle>,
}

impl StaticMarketDataProvider {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    pub fn sample() -> Self {
        Self::new(sample_candles(30))
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for StaticMarketDataProvider {
    async fn fetch_series(
        &self,
        _data_source_id: Uuid,
        _timeframe: &str,
        _start: chrono::DateTime<Utc>,
        _end: chrono::DateTime<Utc>,
    ) -> Result<Vec<Candle>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.candles.clone())
    }
}

/// Provider whose retrieval always fails
pub struct FailingMarketDataProvider;

#[async_trait::async_trait]
impl MarketDataProvider for FailingMarketDataProvider {
    async fn fetch_series(
        &self,
        _data_source_id: Uuid,
        _timeframe: &str,
        _start: chrono::DateTime<Utc>,
        _end: chrono::DateTime<Utc>,
    ) -> Result<Vec<Candle>, Box<dyn std::error::Error + Send + Sync>> {
        Err("data source offline".into())
    }
}

/// Executor + in-memory store wired the way the server binary wires them,
/// with `sh` as the strategy runtime
pub struct TestPipeline {
    pub database: Arc<MemoryDatabase>,
    pub queue: Arc<TaskQueue>,
    pub executor: Arc<BacktestExecutor>,
}

impl TestPipeline {
    pub fn new(timeout: Duration) -> Self {
        Self::with_provider(timeout, Arc::new(StaticMarketDataProvider::sample()))
    }

    pub fn with_provider(timeout: Duration, provider: Arc<dyn MarketDataProvider>) -> Self {
        let database = Arc::new(MemoryDatabase::new());
        let queue = Arc::new(TaskQueue::new());
        let context = Arc::new(JobContext::new(database.clone(), provider, None));
        let executor = Arc::new(BacktestExecutor::new(
            context,
            ExecutorConfig {
                runtime: "sh".to_string(),
                timeout,
            },
        ));
        Self {
            database,
            queue,
            executor,
        }
    }

    pub async fn create_version(&self, code: Option<&str>) -> StrategyVersion {
        let version = StrategyVersion {
            id: Uuid::new_v4(),
            strategy_id: Uuid::new_v4(),
            version_number: 1,
            generated_code: code.map(|c| c.to_string()),
            created_at: Utc::now(),
        };
        self.database
            .create_strategy_version(&version)
            .await
            .expect("create strategy version");
        version
    }

    pub async fn submit(&self, strategy_version_id: Uuid) -> BacktestRun {
        self.submit_with_params(strategy_version_id, None).await
    }

    pub async fn submit_with_params(
        &self,
        strategy_version_id: Uuid,
        parameters: Option<serde_json::Map<String, Value>>,
    ) -> BacktestRun {
        let request = BacktestRequest {
            strategy_version_id,
            parameters,
            data_source_id: Uuid::new_v4(),
            timeframe: "1min".to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        };
        let run = BacktestRun::from_request(request);
        self.database
            .create_backtest_run(&run)
            .await
            .expect("create backtest run");
        run
    }

    /// Spawn the worker loop over this pipeline's queue and executor
    pub fn spawn_worker(&self) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = BacktestWorker::new(self.queue.clone(), self.executor.clone(), shutdown_rx)
            .with_poll_interval(Duration::from_millis(50));
        let handle = tokio::spawn(worker.run());
        (shutdown_tx, handle)
    }
}

/// HTTP surface over the in-memory store for submit/poll flows
pub struct TestApp {
    pub server: TestServer,
    pub database: Arc<MemoryDatabase>,
    pub queue: Arc<TaskQueue>,
    pub metrics: Arc<Metrics>,
}

impl TestApp {
    pub fn new() -> Self {
        let database = Arc::new(MemoryDatabase::new());
        let queue = Arc::new(TaskQueue::new());
        let metrics = Arc::new(Metrics::new().expect("metrics initialization"));
        let state = AppState {
            health: Arc::new(RwLock::new(HealthStatus::default())),
            metrics: metrics.clone(),
            start_time: Arc::new(std::time::Instant::now()),
            database: database.clone(),
            queue: queue.clone(),
        };

        let app = create_router(state);
        let server = TestServer::new(app).expect("start test server");

        Self {
            server,
            database,
            queue,
            metrics,
        }
    }

    /// Spawn a worker over the app's queue and store, with `sh` as runtime
    pub fn spawn_worker(
        &self,
        timeout: Duration,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let context = Arc::new(JobContext::new(
            self.database.clone(),
            Arc::new(StaticMarketDataProvider::sample()),
            Some(self.metrics.clone()),
        ));
        let executor = Arc::new(BacktestExecutor::new(
            context,
            ExecutorConfig {
                runtime: "sh".to_string(),
                timeout,
            },
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = BacktestWorker::new(self.queue.clone(), executor, shutdown_rx)
            .with_poll_interval(Duration::from_millis(50));
        let handle = tokio::spawn(worker.run());
        (shutdown_tx, handle)
    }
}

/// Poll the store until the run reaches a terminal state or the deadline
/// passes
pub async fn wait_until_terminal(
    database: &MemoryDatabase,
    id: Uuid,
    deadline: Duration,
) -> BacktestRun {
    let start = std::time::Instant::now();
    loop {
        let run = database
            .get_backtest_run(id)
            .await
            .expect("store read")
            .expect("run exists");
        if run.status.is_terminal() {
            return run;
        }
        if start.elapsed() > deadline {
            panic!("run {} did not reach a terminal state within {:?}", id, deadline);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
