//! Job context for dependency injection

use crate::db::Database;
use crate::metrics::Metrics;
use crate::services::market_data::MarketDataProvider;
use std::sync::Arc;

/// Context handed to the executor at startup.
///
/// Contains:
/// - Database (job records, strategy versions)
/// - Market data provider (tabular extract for the sandbox)
/// - Metrics (pipeline statistics)
pub struct JobContext {
    pub database: Arc<dyn Database>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub metrics: Option<Arc<Metrics>>,
}

impl JobContext {
    pub fn new(
        database: Arc<dyn Database>,
        provider: Arc<dyn MarketDataProvider>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            database,
            provider,
            metrics,
        }
    }
}
