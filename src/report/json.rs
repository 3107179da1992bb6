use super::types::SessionResults;
use super::Reporter;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Write the JSON report
pub fn generate(results: &SessionResults, output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(output, json)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    log::info!("JSON report saved to: {}", output.display());
    Ok(())
}

/// Reporter that writes `report.json` once the session finishes
#[derive(Debug, Clone)]
pub struct JsonReporter {
    output: PathBuf,
}

impl JsonReporter {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    /// `<dir>/report.json`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("report.json"))
    }

    pub fn path(&self) -> &Path {
        &self.output
    }
}

impl Reporter for JsonReporter {
    fn finish(&mut self, results: &SessionResults) -> Result<()> {
        generate(results, &self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::state::SessionState;

    #[test]
    fn test_report_written() {
        let dir = std::env::temp_dir().join(format!("lumi_report_{}", uuid::Uuid::new_v4()));
        let mut state = SessionState::new("s-42");
        let i = state.begin("tap Position([0.500, 0.500])");
        state.step_mut(i).unwrap().pass();

        let results = SessionResults {
            session_id: state.session_id.clone(),
            device_id: "emulator-5554".into(),
            steps: state.steps.iter().map(|s| s.to_report()).collect(),
            summary: state.summary(),
            generated_at: "2024-01-01T00:00:00Z".into(),
        };

        let mut reporter = JsonReporter::in_dir(&dir);
        reporter.finish(&results).unwrap();

        let back: SessionResults =
            serde_json::from_str(&std::fs::read_to_string(reporter.path()).unwrap()).unwrap();
        assert_eq!(back, results);
        std::fs::remove_dir_all(&dir).ok();
    }
}
