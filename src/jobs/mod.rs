//! Backtest execution pipeline: context, sandbox executor

pub mod context;
pub mod executor;

pub use context::JobContext;
pub use executor::{BacktestExecutor, ExecutorConfig, ExecutorError};
