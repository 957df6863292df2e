//! Market data provider interface and the database-backed implementation

use crate::db::Database;
use crate::models::market::Candle;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Synchronous (from the caller's point of view) market data lookup.
///
/// Returns one ordered time-series table for a data source, timeframe and
/// time range, or a retrieval failure. The core never retries a failure;
/// the executor folds it into the run's failed state.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_series(
        &self,
        data_source_id: Uuid,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Provider reading the candles table of the relational store
pub struct DatabaseMarketDataProvider {
    database: Arc<dyn Database>,
}

impl DatabaseMarketDataProvider {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for DatabaseMarketDataProvider {
    async fn fetch_series(
        &self,
        data_source_id: Uuid,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, Box<dyn std::error::Error + Send + Sync>> {
        self.database
            .get_candles(data_source_id, timeframe, start, end)
            .await
    }
}
