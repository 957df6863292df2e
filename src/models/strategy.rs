//! Strategy version entity supplying the program text executed in the sandbox

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One immutable version of a strategy. `generated_code` holds the program
/// text the sandbox writes into the workspace; a version without code fails
/// validation at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyVersion {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub version_number: i32,
    pub generated_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStrategyVersionRequest {
    #[serde(rename = "strategyId")]
    pub strategy_id: Uuid,
    #[serde(rename = "versionNumber", default = "default_version_number")]
    pub version_number: i32,
    #[serde(rename = "generatedCode")]
    pub generated_code: Option<String>,
}

fn default_version_number() -> i32 {
    1
}

impl StrategyVersion {
    pub fn from_request(request: CreateStrategyVersionRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_id: request.strategy_id,
            version_number: request.version_number,
            generated_code: request.generated_code,
            created_at: Utc::now(),
        }
    }
}
