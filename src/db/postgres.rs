//! PostgreSQL database operations for backtest runs, strategy versions and candles

use crate::config;
use crate::db::Database;
use crate::models::backtest::{BacktestRun, BacktestStatus};
use crate::models::market::Candle;
use crate::models::strategy::StrategyVersion;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_postgres::{Client, NoTls, Row};
use uuid::Uuid;

pub struct PostgresDatabase {
    client: Arc<RwLock<Option<Client>>>,
}

impl PostgresDatabase {
    pub async fn new() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let database_url = config::get_database_url();
        let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
            .await
            .map_err(|e| format!("Failed to connect to PostgreSQL: {}", e))?;

        // Spawn connection task
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        let db = Self {
            client: Arc::new(RwLock::new(Some(client))),
        };

        // Initialize schema
        db.init_schema().await?;

        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = self.client.read().await;
        if let Some(ref c) = *client {
            c.execute(
                "CREATE TABLE IF NOT EXISTS backtest_runs (
                    id UUID PRIMARY KEY,
                    strategy_version_id UUID NOT NULL,
                    status TEXT NOT NULL,
                    started_at TIMESTAMPTZ NOT NULL,
                    completed_at TIMESTAMPTZ,
                    error_message TEXT,
                    parameters JSONB,
                    data_source_id UUID NOT NULL,
                    timeframe TEXT NOT NULL,
                    start_time TIMESTAMPTZ NOT NULL,
                    end_time TIMESTAMPTZ NOT NULL,
                    result_summary JSONB,
                    execution_log JSONB,
                    chart_data JSONB,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )",
                &[],
            )
            .await
            .map_err(|e| format!("Failed to create backtest_runs table: {}", e))?;

            c.execute(
                "CREATE TABLE IF NOT EXISTS strategy_versions (
                    id UUID PRIMARY KEY,
                    strategy_id UUID NOT NULL,
                    version_number INTEGER NOT NULL,
                    generated_code TEXT,
                    created_at TIMESTAMPTZ NOT NULL
                )",
                &[],
            )
            .await
            .map_err(|e| format!("Failed to create strategy_versions table: {}", e))?;

            c.execute(
                "CREATE TABLE IF NOT EXISTS candles (
                    data_source_id UUID NOT NULL,
                    timeframe TEXT NOT NULL,
                    timestamp TIMESTAMPTZ NOT NULL,
                    open DOUBLE PRECISION NOT NULL,
                    high DOUBLE PRECISION NOT NULL,
                    low DOUBLE PRECISION NOT NULL,
                    close DOUBLE PRECISION NOT NULL,
                    volume DOUBLE PRECISION NOT NULL
                )",
                &[],
            )
            .await
            .map_err(|e| format!("Failed to create candles table: {}", e))?;

            c.execute(
                "CREATE INDEX IF NOT EXISTS idx_candles_source_timeframe_ts
                 ON candles (data_source_id, timeframe, timestamp)",
                &[],
            )
            .await
            .map_err(|e| format!("Failed to create candles index: {}", e))?;
        }

        Ok(())
    }

    fn row_to_run(row: &Row) -> Result<BacktestRun, Box<dyn std::error::Error + Send + Sync>> {
        let status_str: String = row.get("status");
        let status = BacktestStatus::parse(&status_str)
            .ok_or_else(|| format!("Unknown backtest status in database: {}", status_str))?;

        let parameters: Option<Value> = row.get("parameters");
        let parameters = parameters.and_then(|v| v.as_object().cloned());

        Ok(BacktestRun {
            id: row.get("id"),
            strategy_version_id: row.get("strategy_version_id"),
            status,
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            error_message: row.get("error_message"),
            parameters,
            data_source_id: row.get("data_source_id"),
            timeframe: row.get("timeframe"),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            result_summary: row.get("result_summary"),
            execution_log: row.get("execution_log"),
            chart_data: row.get("chart_data"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait::async_trait]
impl Database for PostgresDatabase {
    async fn create_backtest_run(
        &self,
        run: &BacktestRun,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = self.client.read().await;
        let c = client.as_ref().ok_or("Database connection not available")?;

        let parameters = run.parameters.clone().map(Value::Object);

        c.execute(
            "INSERT INTO backtest_runs (
                id, strategy_version_id, status, started_at, completed_at,
                error_message, parameters, data_source_id, timeframe,
                start_time, end_time, result_summary, execution_log,
                chart_data, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            &[
                &run.id,
                &run.strategy_version_id,
                &run.status.as_str(),
                &run.started_at,
                &run.completed_at,
                &run.error_message,
                &parameters,
                &run.data_source_id,
                &run.timeframe,
                &run.start_time,
                &run.end_time,
                &run.result_summary,
                &run.execution_log,
                &run.chart_data,
                &run.created_at,
                &run.updated_at,
            ],
        )
        .await
        .map_err(|e| format!("Failed to create backtest run: {}", e))?;

        Ok(())
    }

    async fn get_backtest_run(
        &self,
        id: Uuid,
    ) -> Result<Option<BacktestRun>, Box<dyn std::error::Error + Send + Sync>> {
        let client = self.client.read().await;
        let c = client.as_ref().ok_or("Database connection not available")?;

        let row = c
            .query_opt("SELECT * FROM backtest_runs WHERE id = $1", &[&id])
            .await
            .map_err(|e| format!("Failed to load backtest run: {}", e))?;

        row.map(|r| Self::row_to_run(&r)).transpose()
    }

    async fn get_backtest_status(
        &self,
        id: Uuid,
    ) -> Result<Option<BacktestStatus>, Box<dyn std::error::Error + Send + Sync>> {
        let client = self.client.read().await;
        let c = client.as_ref().ok_or("Database connection not available")?;

        let row = c
            .query_opt("SELECT status FROM backtest_runs WHERE id = $1", &[&id])
            .await
            .map_err(|e| format!("Failed to load backtest status: {}", e))?;

        match row {
            Some(r) => {
                let status_str: String = r.get("status");
                let status = BacktestStatus::parse(&status_str)
                    .ok_or_else(|| format!("Unknown backtest status in database: {}", status_str))?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    async fn mark_backtest_running(
        &self,
        id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = self.client.read().await;
        let c = client.as_ref().ok_or("Database connection not available")?;

        c.execute(
            "UPDATE backtest_runs
             SET status = 'running', updated_at = $2
             WHERE id = $1 AND status = 'pending'",
            &[&id, &Utc::now()],
        )
        .await
        .map_err(|e| format!("Failed to mark backtest running: {}", e))?;

        Ok(())
    }

    async fn complete_backtest_success(
        &self,
        id: Uuid,
        result_summary: Value,
        execution_log: Value,
        chart_data: Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = self.client.read().await;
        let c = client.as_ref().ok_or("Database connection not available")?;

        // One UPDATE: status, results and completed_at move together, and
        // only out of a non-terminal state.
        c.execute(
            "UPDATE backtest_runs
             SET status = 'success',
                 result_summary = $2,
                 execution_log = $3,
                 chart_data = $4,
                 error_message = NULL,
                 completed_at = $5,
                 updated_at = $5
             WHERE id = $1 AND status IN ('pending', 'running')",
            &[&id, &result_summary, &execution_log, &chart_data, &Utc::now()],
        )
        .await
        .map_err(|e| format!("Failed to complete backtest run: {}", e))?;

        Ok(())
    }

    async fn complete_backtest_failure(
        &self,
        id: Uuid,
        error_message: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = self.client.read().await;
        let c = client.as_ref().ok_or("Database connection not available")?;

        c.execute(
            "UPDATE backtest_runs
             SET status = 'failed',
                 result_summary = NULL,
                 execution_log = NULL,
                 chart_data = NULL,
                 error_message = $2,
                 completed_at = $3,
                 updated_at = $3
             WHERE id = $1 AND status IN ('pending', 'running')",
            &[&id, &error_message, &Utc::now()],
        )
        .await
        .map_err(|e| format!("Failed to fail backtest run: {}", e))?;

        Ok(())
    }

    async fn create_strategy_version(
        &self,
        version: &StrategyVersion,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = self.client.read().await;
        let c = client.as_ref().ok_or("Database connection not available")?;

        c.execute(
            "INSERT INTO strategy_versions (id, strategy_id, version_number, generated_code, created_at)
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &version.id,
                &version.strategy_id,
                &version.version_number,
                &version.generated_code,
                &version.created_at,
            ],
        )
        .await
        .map_err(|e| format!("Failed to create strategy version: {}", e))?;

        Ok(())
    }

    async fn get_strategy_version(
        &self,
        id: Uuid,
    ) -> Result<Option<StrategyVersion>, Box<dyn std::error::Error + Send + Sync>> {
        let client = self.client.read().await;
        let c = client.as_ref().ok_or("Database connection not available")?;

        let row = c
            .query_opt(
                "SELECT id, strategy_id, version_number, generated_code, created_at
                 FROM strategy_versions WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| format!("Failed to load strategy version: {}", e))?;

        Ok(row.map(|r| StrategyVersion {
            id: r.get("id"),
            strategy_id: r.get("strategy_id"),
            version_number: r.get("version_number"),
            generated_code: r.get("generated_code"),
            created_at: r.get("created_at"),
        }))
    }

    async fn insert_candles(
        &self,
        data_source_id: Uuid,
        timeframe: &str,
        candles: &[Candle],
    ) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        let client = self.client.read().await;
        let c = client.as_ref().ok_or("Database connection not available")?;

        let mut inserted = 0u64;
        for candle in candles {
            c.execute(
                "INSERT INTO candles (data_source_id, timeframe, timestamp, open, high, low, close, volume)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &data_source_id,
                    &timeframe,
                    &candle.timestamp,
                    &candle.open,
                    &candle.high,
                    &candle.low,
                    &candle.close,
                    &candle.volume,
                ],
            )
            .await
            .map_err(|e| format!("Failed to insert candle: {}", e))?;
            inserted += 1;
        }

        Ok(inserted)
    }

    async fn get_candles(
        &self,
        data_source_id: Uuid,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, Box<dyn std::error::Error + Send + Sync>> {
        let client = self.client.read().await;
        let c = client.as_ref().ok_or("Database connection not available")?;

        let rows = c
            .query(
                "SELECT timestamp, open, high, low, close, volume
                 FROM candles
                 WHERE data_source_id = $1 AND timeframe = $2
                   AND timestamp >= $3 AND timestamp <= $4
                 ORDER BY timestamp ASC",
                &[&data_source_id, &timeframe, &start, &end],
            )
            .await
            .map_err(|e| format!("Failed to load candles: {}", e))?;

        Ok(rows
            .iter()
            .map(|r| Candle {
                timestamp: r.get("timestamp"),
                open: r.get("open"),
                high: r.get("high"),
                low: r.get("low"),
                close: r.get("close"),
                volume: r.get("volume"),
            })
            .collect())
    }
}
