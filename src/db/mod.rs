//! Persistence layer: the `Database` trait and its PostgreSQL implementation

pub mod postgres;

pub use postgres::PostgresDatabase;

use crate::models::backtest::{BacktestRun, BacktestStatus};
use crate::models::market::Candle;
use crate::models::strategy::StrategyVersion;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Persisted surface the service depends on: backtest run records (the
/// single source of truth for status), strategy versions and candles.
///
/// The run record has exactly one writer after creation: the worker loop.
/// Implementations must keep terminal updates atomic: status, results and
/// `completed_at` change in one operation, guarded on the current status so
/// a duplicate dequeue can never regress a terminal row.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    async fn create_backtest_run(
        &self,
        run: &BacktestRun,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn get_backtest_run(
        &self,
        id: Uuid,
    ) -> Result<Option<BacktestRun>, Box<dyn std::error::Error + Send + Sync>>;

    async fn get_backtest_status(
        &self,
        id: Uuid,
    ) -> Result<Option<BacktestStatus>, Box<dyn std::error::Error + Send + Sync>>;

    /// pending → running; a no-op when the run is no longer pending
    async fn mark_backtest_running(
        &self,
        id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Terminal success: stores all three result payloads and stamps
    /// `completed_at` in the same operation
    async fn complete_backtest_success(
        &self,
        id: Uuid,
        result_summary: Value,
        execution_log: Value,
        chart_data: Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Terminal failure: stores the error message, clears results and
    /// stamps `completed_at` in the same operation
    async fn complete_backtest_failure(
        &self,
        id: Uuid,
        error_message: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn create_strategy_version(
        &self,
        version: &StrategyVersion,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn get_strategy_version(
        &self,
        id: Uuid,
    ) -> Result<Option<StrategyVersion>, Box<dyn std::error::Error + Send + Sync>>;

    /// Bulk insert of candle rows for a data source; returns rows written
    async fn insert_candles(
        &self,
        data_source_id: Uuid,
        timeframe: &str,
        candles: &[Candle],
    ) -> Result<u64, Box<dyn std::error::Error + Send + Sync>>;

    /// Ordered (ascending by timestamp) series for one data source,
    /// timeframe and time range
    async fn get_candles(
        &self,
        data_source_id: Uuid,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, Box<dyn std::error::Error + Send + Sync>>;
}
