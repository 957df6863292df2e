//! Shared data models spanning the service layers.

pub mod backtest;
pub mod market;
pub mod strategy;

pub use backtest::{BacktestRequest, BacktestRun, BacktestStatus, BacktestStatusResponse};
pub use market::Candle;
pub use strategy::{CreateStrategyVersionRequest, StrategyVersion};
