//! Stratrack backtest service
//!
//! Submission, tracking and asynchronous execution of trading-strategy
//! backtests: a relational job store, an in-process task queue, a single
//! worker loop and a subprocess execution sandbox.

pub mod config;
pub mod core;
pub mod db;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
