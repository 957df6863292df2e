//! Unit tests for the backtest run model and status state machine

use chrono::Utc;
use serde_json::json;
use stratrack::models::backtest::{BacktestRequest, BacktestRun, BacktestStatus};
use uuid::Uuid;

fn sample_request() -> BacktestRequest {
    serde_json::from_value(json!({
        "strategyVersionId": Uuid::new_v4(),
        "dataSourceId": Uuid::new_v4(),
        "timeframe": "1min",
        "startTime": "2024-01-01T00:00:00Z",
        "endTime": "2024-01-02T00:00:00Z"
    }))
    .expect("valid request")
}

#[test]
fn status_round_trips_through_strings() {
    for status in [
        BacktestStatus::Pending,
        BacktestStatus::Running,
        BacktestStatus::Success,
        BacktestStatus::Failed,
    ] {
        assert_eq!(BacktestStatus::parse(status.as_str()), Some(status));
    }
}

#[test]
fn status_rejects_unknown_strings() {
    assert_eq!(BacktestStatus::parse("cancelled"), None);
    assert_eq!(BacktestStatus::parse("PENDING"), None);
    assert_eq!(BacktestStatus::parse(""), None);
}

#[test]
fn status_serializes_lowercase() {
    assert_eq!(
        serde_json::to_value(BacktestStatus::Pending).unwrap(),
        json!("pending")
    );
    assert_eq!(
        serde_json::to_value(BacktestStatus::Failed).unwrap(),
        json!("failed")
    );
}

#[test]
fn only_success_and_failed_are_terminal() {
    assert!(!BacktestStatus::Pending.is_terminal());
    assert!(!BacktestStatus::Running.is_terminal());
    assert!(BacktestStatus::Success.is_terminal());
    assert!(BacktestStatus::Failed.is_terminal());
}

#[test]
fn from_request_creates_pending_run_with_empty_results() {
    let request = sample_request();
    let run = BacktestRun::from_request(request);

    assert_eq!(run.status, BacktestStatus::Pending);
    assert!(run.completed_at.is_none());
    assert!(run.error_message.is_none());
    assert!(run.result_summary.is_none());
    assert!(run.execution_log.is_none());
    assert!(run.chart_data.is_none());
    assert!(run.started_at <= Utc::now());
}

#[test]
fn from_request_assigns_unique_ids() {
    let a = BacktestRun::from_request(sample_request());
    let b = BacktestRun::from_request(sample_request());
    assert_ne!(a.id, b.id);
}

#[test]
fn request_parses_camel_case_keys_and_optional_parameters() {
    let request: BacktestRequest = serde_json::from_value(json!({
        "strategyVersionId": "5a8cdee5-4f22-4e28-93bd-a45bfcfeaf2f",
        "parameters": {"initial_cash": 5000, "fast_period": 12},
        "dataSourceId": "91a1f4ad-5aa3-4b51-bf44-5eb0c7a0c24a",
        "timeframe": "5min",
        "startTime": "2024-03-01T00:00:00Z",
        "endTime": "2024-03-08T00:00:00Z"
    }))
    .expect("valid request");

    assert_eq!(request.timeframe, "5min");
    let params = request.parameters.expect("parameters present");
    assert_eq!(params.get("initial_cash"), Some(&json!(5000)));

    let without_params = sample_request();
    assert!(without_params.parameters.is_none());
}
