use crate::runner::state::{StepReport, StepSummary};
use serde::{Deserialize, Serialize};

/// Session results for report generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResults {
    pub session_id: String,
    pub device_id: String,
    pub steps: Vec<StepReport>,
    pub summary: StepSummary,
    pub generated_at: String,
}
