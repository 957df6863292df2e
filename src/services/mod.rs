//! Service-layer collaborators

pub mod market_data;

pub use market_data::{DatabaseMarketDataProvider, MarketDataProvider};
