//! Prometheus metrics for the HTTP surface and the backtest pipeline

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Registry plus the individual collectors the service updates.
///
/// HTTP metrics are updated by the middleware in `core::http`; pipeline
/// metrics by the submission handler and the executor.
pub struct Metrics {
    registry: Registry,

    pub http_requests_total: IntCounter,
    pub http_requests_in_flight: IntGauge,
    pub http_request_duration_seconds: Histogram,

    pub backtests_submitted_total: IntCounter,
    pub backtests_succeeded_total: IntCounter,
    pub backtests_failed_total: IntCounter,
    pub backtests_active: IntGauge,
    pub backtest_duration_seconds: Histogram,
    pub queue_depth: IntGauge,
    pub database_connected: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounter::with_opts(Opts::new(
            "http_requests_total",
            "Total number of HTTP requests received",
        ))?;
        let http_requests_in_flight = IntGauge::with_opts(Opts::new(
            "http_requests_in_flight",
            "Number of HTTP requests currently being served",
        ))?;
        let http_request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        ))?;

        let backtests_submitted_total = IntCounter::with_opts(Opts::new(
            "backtests_submitted_total",
            "Total number of backtest runs submitted",
        ))?;
        let backtests_succeeded_total = IntCounter::with_opts(Opts::new(
            "backtests_succeeded_total",
            "Total number of backtest runs that completed successfully",
        ))?;
        let backtests_failed_total = IntCounter::with_opts(Opts::new(
            "backtests_failed_total",
            "Total number of backtest runs that reached the failed state",
        ))?;
        let backtests_active = IntGauge::with_opts(Opts::new(
            "backtests_active",
            "Number of backtest runs currently executing",
        ))?;
        let backtest_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "backtest_duration_seconds",
                "Wall-clock duration of backtest execution in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0]),
        )?;
        let queue_depth = IntGauge::with_opts(Opts::new(
            "queue_depth",
            "Number of run ids waiting in the task queue",
        ))?;
        let database_connected = Gauge::with_opts(Opts::new(
            "database_connected",
            "1 when the database connection is established, 0 otherwise",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(backtests_submitted_total.clone()))?;
        registry.register(Box::new(backtests_succeeded_total.clone()))?;
        registry.register(Box::new(backtests_failed_total.clone()))?;
        registry.register(Box::new(backtests_active.clone()))?;
        registry.register(Box::new(backtest_duration_seconds.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(database_connected.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_requests_in_flight,
            http_request_duration_seconds,
            backtests_submitted_total,
            backtests_succeeded_total,
            backtests_failed_total,
            backtests_active,
            backtest_duration_seconds,
            queue_depth,
            database_connected,
        })
    }

    /// Render all collectors in the Prometheus text exposition format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
