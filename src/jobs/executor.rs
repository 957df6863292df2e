//! Execution sandbox: per-run workspace, supervised subprocess, artifact ingestion
//!
//! Drives the run state machine PENDING → RUNNING → {SUCCESS, FAILED}. Every
//! failure inside the sandbox is converted into a persisted failed state; no
//! error escapes to the worker loop from the sandbox path.

use crate::config;
use crate::jobs::context::JobContext;
use crate::models::backtest::{BacktestRun, BacktestStatus};
use crate::models::market::Candle;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

/// Input artifacts written into the workspace
const STRATEGY_FILE: &str = "strategy.py";
const PARAMS_FILE: &str = "params.json";
const DATA_FILE: &str = "data.csv";

/// Output artifacts expected from the subprocess after a zero exit
const RESULT_FILE: &str = "result.json";
const TRADES_FILE: &str = "trades.json";
const CHART_FILE: &str = "chart_data.json";

const DEFAULT_INITIAL_CASH: u64 = 100_000;

/// Everything that can go wrong between RUNNING and a terminal state.
/// All variants map onto the failed status through their `Display` text.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Execution failed: {stderr}")]
    Execution { stderr: String },

    #[error("Execution timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Missing output artifact: {name}")]
    MissingArtifact { name: &'static str },

    #[error("Invalid output artifact {name}: {reason}")]
    InvalidArtifact { name: &'static str, reason: String },

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("Failed to write market data extract: {0}")]
    Extract(#[from] csv::Error),

    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

/// Sandbox knobs: which interpreter runs the strategy program and the hard
/// wall-clock budget enforced on it
#[derive(Clone)]
pub struct ExecutorConfig {
    pub runtime: String,
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            runtime: "python3".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        Self {
            runtime: config::get_strategy_runtime(),
            timeout: config::get_backtest_timeout(),
        }
    }
}

struct SandboxOutput {
    result_summary: Value,
    execution_log: Value,
    chart_data: Value,
}

pub struct BacktestExecutor {
    context: Arc<JobContext>,
    config: ExecutorConfig,
}

impl BacktestExecutor {
    pub fn new(context: Arc<JobContext>, config: ExecutorConfig) -> Self {
        Self { context, config }
    }

    /// Execute one dequeued run to a terminal state.
    ///
    /// Errors returned here are infrastructure failures around the sandbox
    /// (the record could not be read or a terminal state could not be
    /// persisted); the worker loop logs them and keeps going. Sandbox
    /// failures themselves never surface; they become the failed state.
    pub async fn execute(
        &self,
        run_id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(ref metrics) = self.context.metrics {
            metrics.queue_depth.dec();
        }

        let Some(run) = self.context.database.get_backtest_run(run_id).await? else {
            warn!(run_id = %run_id, "Executor: backtest {} not found", run_id);
            return Ok(());
        };

        // Duplicate enqueue guard: anything past pending has been picked up
        // before, so this dequeue is a no-op.
        if run.status != BacktestStatus::Pending {
            info!(
                run_id = %run_id,
                status = %run.status,
                "Executor: backtest {} already {}, skipping duplicate dequeue",
                run_id,
                run.status
            );
            return Ok(());
        }

        // Validation short-circuit: no program text means the run fails
        // before RUNNING and no workspace is ever created.
        let version = self
            .context
            .database
            .get_strategy_version(run.strategy_version_id)
            .await?;
        let code = version
            .and_then(|v| v.generated_code)
            .filter(|c| !c.trim().is_empty());
        let Some(code) = code else {
            warn!(run_id = %run_id, "Executor: backtest {} has no strategy code", run_id);
            self.context
                .database
                .complete_backtest_failure(run_id, "No strategy code found")
                .await?;
            if let Some(ref metrics) = self.context.metrics {
                metrics.backtests_failed_total.inc();
            }
            return Ok(());
        };

        info!(run_id = %run_id, "Executor: starting backtest {}", run_id);
        self.context.database.mark_backtest_running(run_id).await?;

        let start = Instant::now();
        if let Some(ref metrics) = self.context.metrics {
            metrics.backtests_active.inc();
        }

        let outcome = self.run_sandbox(&run, &code).await;

        match outcome {
            Ok(output) => {
                self.context
                    .database
                    .complete_backtest_success(
                        run_id,
                        output.result_summary,
                        output.execution_log,
                        output.chart_data,
                    )
                    .await?;
                if let Some(ref metrics) = self.context.metrics {
                    metrics.backtests_succeeded_total.inc();
                }
                info!(
                    run_id = %run_id,
                    duration_ms = start.elapsed().as_millis(),
                    "Executor: backtest {} succeeded",
                    run_id
                );
            }
            Err(e) => {
                self.context
                    .database
                    .complete_backtest_failure(run_id, &e.to_string())
                    .await?;
                if let Some(ref metrics) = self.context.metrics {
                    metrics.backtests_failed_total.inc();
                }
                warn!(
                    run_id = %run_id,
                    error = %e,
                    "Executor: backtest {} failed",
                    run_id
                );
            }
        }

        if let Some(ref metrics) = self.context.metrics {
            metrics.backtests_active.dec();
            metrics
                .backtest_duration_seconds
                .observe(start.elapsed().as_secs_f64());
        }

        Ok(())
    }

    /// Steps 1-5 of the RUNNING phase: workspace, input artifacts,
    /// supervised subprocess, output ingestion.
    async fn run_sandbox(
        &self,
        run: &BacktestRun,
        code: &str,
    ) -> Result<SandboxOutput, ExecutorError> {
        let workspace = tempfile::Builder::new().prefix("bt_").tempdir()?;
        let workspace_path = workspace.path();

        let code_path = workspace_path.join(STRATEGY_FILE);
        tokio::fs::write(&code_path, code).await?;

        let mut params = run.parameters.clone().unwrap_or_default();
        params
            .entry("initial_cash".to_string())
            .or_insert(json!(DEFAULT_INITIAL_CASH));
        let params_json = serde_json::to_string_pretty(&Value::Object(params))
            .map_err(|e| ExecutorError::InvalidArtifact {
                name: PARAMS_FILE,
                reason: e.to_string(),
            })?;
        tokio::fs::write(workspace_path.join(PARAMS_FILE), params_json).await?;

        let candles = self
            .context
            .provider
            .fetch_series(run.data_source_id, &run.timeframe, run.start_time, run.end_time)
            .await
            .map_err(|e| ExecutorError::MarketData(e.to_string()))?;
        if candles.is_empty() {
            return Err(ExecutorError::MarketData(format!(
                "No market data available for data source {}",
                run.data_source_id
            )));
        }
        write_data_extract(&workspace_path.join(DATA_FILE), &candles)?;

        // The subprocess is untrusted user code: piped stdio, and
        // kill_on_drop so a timed-out child does not outlive its supervisor.
        let child = Command::new(&self.config.runtime)
            .arg(&code_path)
            .arg(workspace_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExecutorError::Timeout {
                    timeout_secs: self.config.timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(ExecutorError::Execution { stderr });
        }

        // All three must parse; partial success is never recorded.
        let result_summary = read_artifact(workspace_path, RESULT_FILE).await?;
        let execution_log = read_artifact(workspace_path, TRADES_FILE).await?;
        let chart_data = read_artifact(workspace_path, CHART_FILE).await?;

        Ok(SandboxOutput {
            result_summary,
            execution_log,
            chart_data,
        })
    }
}

/// Write the ordered series as the CSV extract the strategy program reads,
/// indexed by timestamp
fn write_data_extract(path: &Path, candles: &[Candle]) -> Result<(), ExecutorError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["timestamp", "open", "high", "low", "close", "volume"])?;
    for candle in candles {
        writer.write_record(&[
            candle.timestamp.to_rfc3339(),
            candle.open.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.close.to_string(),
            candle.volume.to_string(),
        ])?;
    }
    writer.flush().map_err(ExecutorError::Workspace)?;
    Ok(())
}

async fn read_artifact(workspace: &Path, name: &'static str) -> Result<Value, ExecutorError> {
    let raw = match tokio::fs::read_to_string(workspace.join(name)).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ExecutorError::MissingArtifact { name })
        }
        Err(e) => return Err(ExecutorError::Workspace(e)),
    };

    serde_json::from_str(&raw).map_err(|e| ExecutorError::InvalidArtifact {
        name,
        reason: e.to_string(),
    })
}
