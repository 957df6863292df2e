//! Backtest run record and its status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of a backtest run.
///
/// Transitions are forward-only: pending → running → {success, failed},
/// plus the validation short-circuit pending → failed when a run has no
/// executable strategy code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacktestStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl BacktestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BacktestStatus::Pending => "pending",
            BacktestStatus::Running => "running",
            BacktestStatus::Success => "success",
            BacktestStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BacktestStatus::Pending),
            "running" => Some(BacktestStatus::Running),
            "success" => Some(BacktestStatus::Success),
            "failed" => Some(BacktestStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BacktestStatus::Success | BacktestStatus::Failed)
    }
}

impl std::fmt::Display for BacktestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted backtest run.
///
/// Inputs are immutable after creation; execution state and results are
/// mutated only by the worker loop.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestRun {
    pub id: Uuid,
    pub strategy_version_id: Uuid,

    pub status: BacktestStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,

    pub parameters: Option<serde_json::Map<String, Value>>,
    pub data_source_id: Uuid,
    pub timeframe: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    pub result_summary: Option<Value>,
    pub execution_log: Option<Value>,
    pub chart_data: Option<Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BacktestRun {
    /// Build a fresh pending run from a submission request
    pub fn from_request(request: BacktestRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            strategy_version_id: request.strategy_version_id,
            status: BacktestStatus::Pending,
            started_at: now,
            completed_at: None,
            error_message: None,
            parameters: request.parameters,
            data_source_id: request.data_source_id,
            timeframe: request.timeframe,
            start_time: request.start_time,
            end_time: request.end_time,
            result_summary: None,
            execution_log: None,
            chart_data: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Submission payload for a new backtest run
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestRequest {
    #[serde(rename = "strategyVersionId")]
    pub strategy_version_id: Uuid,
    #[serde(default)]
    pub parameters: Option<serde_json::Map<String, Value>>,
    #[serde(rename = "dataSourceId")]
    pub data_source_id: Uuid,
    pub timeframe: String,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
}

/// Status projection returned by the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestStatusResponse {
    pub id: Uuid,
    pub status: BacktestStatus,
}
