//! Interactive pretty-printer. Colorizes when stdout is a TTY — new
//! relative to the teacher (which has no terminal reporter, only JSON/SARIF
//! writers), grounded on the smallest possible addition: stable stdlib
//! `std::io::IsTerminal`, no new crate, as `SPEC_FULL.md` §4.I calls for.

use std::io::{self, IsTerminal, Write};

use crate::error::ShacError;
use crate::types::{Artifact, Finding, Level};

use super::{Reporter, RunSummary};

pub struct TerminalReporter<W: Write> {
    out: W,
    color: bool,
    findings_seen: usize,
}

impl TerminalReporter<io::Stdout> {
    pub fn stdout() -> Self {
        let color = io::stdout().is_terminal();
        Self { out: io::stdout(), color, findings_seen: 0 }
    }
}

impl<W: Write> TerminalReporter<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color, findings_seen: 0 }
    }

    fn level_label(&self, level: Level) -> String {
        if !self.color {
            return level.to_string();
        }
        let code = match level {
            Level::Notice => "36",
            Level::Warning => "33",
            Level::Error => "31",
        };
        format!("\x1b[{code}m{level}\x1b[0m")
    }
}

impl<W: Write> Reporter for TerminalReporter<W> {
    fn on_finding(&mut self, finding: &Finding) {
        self.findings_seen += 1;
        let location = match (&finding.filepath, finding.line) {
            (Some(path), Some(line)) => format!("{path}:{line}"),
            (Some(path), None) => path.clone(),
            (None, _) => "<no file>".to_string(),
        };
        let message = finding.message.as_deref().unwrap_or("(formatter fix)");
        let _ = writeln!(
            self.out,
            "{} [{}] {}: {}",
            self.level_label(finding.level),
            finding.check_name,
            location,
            message
        );
    }

    fn on_artifact(&mut self, artifact: &Artifact) {
        let _ = writeln!(
            self.out,
            "artifact [{}] {} ({} bytes)",
            artifact.check_name,
            artifact.filepath,
            artifact.content.len()
        );
    }

    fn finish(&mut self, _findings: &[Finding], summary: &RunSummary) -> Result<(), ShacError> {
        if self.findings_seen == 0 {
            let _ = writeln!(self.out, "no findings");
        }
        if !summary.checks_failed.is_empty() {
            let _ = writeln!(self.out, "{} check(s) failed abnormally:", summary.checks_failed.len());
            for name in &summary.checks_failed {
                let _ = writeln!(self.out, "  - {name}");
            }
        }
        let _ = self.out.flush();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding() -> Finding {
        Finding {
            check_name: "c".to_string(),
            level: Level::Error,
            message: Some("bad".to_string()),
            filepath: Some("a.txt".to_string()),
            line: Some(3),
            col: None,
            end_line: None,
            end_col: None,
            replacements: vec![],
        }
    }

    #[test]
    fn plain_output_has_no_ansi_codes() {
        let mut buf = Vec::new();
        let mut reporter = TerminalReporter::new(&mut buf, false);
        reporter.on_finding(&finding());
        let text = String::from_utf8(buf).unwrap();
        assert!(!text.contains("\x1b["));
        assert!(text.contains("a.txt:3"));
    }

    #[test]
    fn color_output_wraps_level_in_ansi() {
        let mut buf = Vec::new();
        let mut reporter = TerminalReporter::new(&mut buf, true);
        reporter.on_finding(&finding());
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\x1b["));
    }

    #[test]
    fn empty_run_reports_no_findings() {
        let mut buf = Vec::new();
        let mut reporter = TerminalReporter::new(&mut buf, false);
        reporter.finish(&[], &RunSummary::default()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("no findings"));
    }
}
