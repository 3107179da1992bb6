pub mod json;
pub mod types;

pub use json::JsonReporter;
pub use types::SessionResults;

use crate::runner::state::StepReport;
use anyhow::Result;
use std::path::Path;

/// Receives step results and artifacts as the session runs
///
/// Reporting is best effort: the session logs a failed `finish` and carries on.
pub trait Reporter: Send {
    /// A step completed
    fn step(&mut self, step: &StepReport) {
        log::debug!("step {} {:?}", step.title, step.status);
    }

    /// An artifact was written for the current step
    fn artifact(&mut self, path: &Path) {
        log::debug!("artifact {}", path.display());
    }

    /// The session is over
    fn finish(&mut self, results: &SessionResults) -> Result<()>;
}
