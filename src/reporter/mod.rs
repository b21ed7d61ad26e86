//! Reporter (spec §4.I): a sink that consumes finding/artifact events and
//! a final run summary. Two built-in sinks, `terminal` and `sarif`.

pub mod sarif;
pub mod terminal;

use crate::error::ShacError;
use crate::types::{Artifact, Finding};

/// Per-run summary handed to `Reporter::finish`.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub checks_run: usize,
    pub checks_failed: Vec<String>,
}

impl RunSummary {
    /// Exit code per spec §6: 0 if no error-level finding and no abnormal
    /// check failure, else 1.
    pub fn exit_code(&self, findings: &[Finding]) -> i32 {
        let has_error = findings.iter().any(|f| f.level == crate::types::Level::Error);
        if has_error || !self.checks_failed.is_empty() {
            1
        } else {
            0
        }
    }
}

pub trait Reporter {
    fn on_finding(&mut self, finding: &Finding);
    fn on_artifact(&mut self, artifact: &Artifact);
    fn finish(&mut self, findings: &[Finding], summary: &RunSummary) -> Result<(), ShacError>;
}
