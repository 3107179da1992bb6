use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Step execution status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Passed,
    Failed { error: String },
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Running)
    }
}

/// One facade call as it shows up in the report
#[derive(Debug, Clone)]
pub struct StepState {
    pub index: usize,
    pub title: String,
    pub status: StepStatus,
    pub started_at: Instant,
    pub duration_ms: Option<u64>,
    pub artifacts: Vec<String>,
}

impl StepState {
    pub fn new(index: usize, title: &str) -> Self {
        Self {
            index,
            title: title.to_string(),
            status: StepStatus::Running,
            started_at: Instant::now(),
            duration_ms: None,
            artifacts: Vec::new(),
        }
    }

    pub fn pass(&mut self) {
        self.finish(StepStatus::Passed);
    }

    pub fn fail(&mut self, error: String) {
        self.finish(StepStatus::Failed { error });
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        self.duration_ms = Some(self.started_at.elapsed().as_millis() as u64);
    }

    /// Serialize state for reporting (without Instant which isn't serializable)
    pub fn to_report(&self) -> StepReport {
        StepReport {
            index: self.index,
            title: self.title.clone(),
            status: self.status.clone(),
            duration_ms: self.duration_ms,
            artifacts: self.artifacts.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub index: usize,
    pub title: String,
    pub status: StepStatus,
    pub duration_ms: Option<u64>,
    pub artifacts: Vec<String>,
}

/// Pass/fail counts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Steps recorded over a session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub steps: Vec<StepState>,
    pub started_at: Instant,
}

impl SessionState {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            steps: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// Open a new step and return its index
    pub fn begin(&mut self, title: &str) -> usize {
        let index = self.steps.len();
        self.steps.push(StepState::new(index, title));
        index
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut StepState> {
        self.steps.get_mut(index)
    }

    /// Attach an artifact to the most recent step
    pub fn attach(&mut self, path: &str) {
        if let Some(step) = self.steps.last_mut() {
            step.artifacts.push(path.to_string());
        }
    }

    pub fn summary(&self) -> StepSummary {
        let (passed, failed) = self
            .steps
            .iter()
            .fold((0, 0), |(p, f), step| match step.status {
                StepStatus::Passed => (p + 1, f),
                StepStatus::Failed { .. } => (p, f + 1),
                StepStatus::Running => (p, f),
            });
        StepSummary {
            total: self.steps.len(),
            passed,
            failed,
            duration_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}
