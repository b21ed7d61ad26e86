//! Core data model — `shac`'s §3: `Finding`, `Artifact`, `FileMeta`,
//! `SubprocessSpec`/`Result`, `FixPlan`, and the `CheckRef` handle produced
//! by `shac.check(...)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A finding's severity. Named `Level` (not `Severity`) and three-valued as
/// `notice/warning/error`, per spec §3 — this is a deliberate rename from
/// this crate's ironlayer-engine ancestor, whose `Severity` had an `Info`
/// variant instead of `Notice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Notice,
    Warning,
    Error,
}

impl Level {
    /// SARIF's lower-cased `level`: `notice -> note`, others unchanged.
    pub fn sarif_level(self) -> &'static str {
        match self {
            Level::Notice => "note",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Notice => write!(f, "notice"),
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
        }
    }
}

/// A single structured finding emitted via `ctx.emit.finding(...)`.
///
/// Invariants (validated at construction, see `Finding::validate`):
/// a finding with a span has `line >= 1`; `end_line >= line`; when
/// `line == end_line` then `end_col >= col`; `col` is 1-based inclusive,
/// `end_col` is 1-based exclusive; `message` may be omitted only for a
/// formatter finding with `level=error`, a `filepath`, and exactly one
/// replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub check_name: String,
    pub level: Level,
    pub message: Option<String>,
    pub filepath: Option<String>,
    pub line: Option<u32>,
    pub col: Option<u32>,
    pub end_line: Option<u32>,
    pub end_col: Option<u32>,
    pub replacements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FindingValidationError {
    #[error("line must be >= 1")]
    LineZero,
    #[error("end_line must be >= line")]
    EndLineBeforeLine,
    #[error("end_col must be >= col when line == end_line")]
    EndColBeforeCol,
    #[error("message may only be omitted for a formatter finding with level=error, a filepath, and exactly one replacement")]
    MissingMessage,
    #[error("a span (line/col) requires a filepath")]
    SpanWithoutFilepath,
}

impl Finding {
    /// Validate the invariants from spec §3. `is_formatter` is whether the
    /// originating check was registered with `formatter=true`.
    pub fn validate(&self, is_formatter: bool) -> Result<(), FindingValidationError> {
        if let Some(line) = self.line {
            if line < 1 {
                return Err(FindingValidationError::LineZero);
            }
            if self.filepath.is_none() {
                return Err(FindingValidationError::SpanWithoutFilepath);
            }
            if let Some(end_line) = self.end_line {
                if end_line < line {
                    return Err(FindingValidationError::EndLineBeforeLine);
                }
                if end_line == line {
                    if let (Some(col), Some(end_col)) = (self.col, self.end_col) {
                        if end_col < col {
                            return Err(FindingValidationError::EndColBeforeCol);
                        }
                    }
                }
            }
        }
        if self.message.is_none() {
            let omission_allowed = is_formatter
                && self.level == Level::Error
                && self.filepath.is_some()
                && self.replacements.len() == 1;
            if !omission_allowed {
                return Err(FindingValidationError::MissingMessage);
            }
        }
        Ok(())
    }

    /// True if this finding is eligible fix-planner input: `level == error`
    /// and exactly one replacement (spec §4.H).
    pub fn is_fix_eligible(&self) -> bool {
        self.level == Level::Error && self.replacements.len() == 1
    }
}

/// An opaque file-bytes payload surfaced to the reporter, never applied to
/// the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub check_name: String,
    pub filepath: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Added,
    Modified,
    Deleted,
}

/// SCM result for one file: its action relative to the base, and the set
/// of lines that are new or changed relative to that base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub path: String,
    pub action: FileAction,
    /// (1-based line number, line contents) in ascending line-number order.
    pub new_lines: Vec<(u32, String)>,
}

pub type FileMetaMap = BTreeMap<String, FileMeta>;

/// A request to run a subprocess under the configured sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubprocessSpec {
    pub cmd: Vec<String>,
    pub cwd: String,
    pub env: BTreeMap<String, String>,
    pub stdin: Option<Vec<u8>>,
    pub allow_network: bool,
    pub ok_retcodes: Option<Vec<i32>>,
    pub raise_on_failure: bool,
}

impl SubprocessSpec {
    /// `raise_on_failure` and a user-supplied `ok_retcodes` are mutually
    /// exclusive (spec §3).
    pub fn validate(&self) -> Result<(), String> {
        if self.ok_retcodes.is_some() && self.raise_on_failure {
            return Err("raise_on_failure and ok_retcodes are mutually exclusive".to_string());
        }
        Ok(())
    }
}

/// Per-stream truncation bound for `SubprocessResult`: 128 MiB on 32-bit
/// builds, 4 GiB on 64-bit builds (spec §3).
#[cfg(target_pointer_width = "32")]
pub const MAX_STREAM_BYTES: usize = 128 * 1024 * 1024;
#[cfg(not(target_pointer_width = "32"))]
pub const MAX_STREAM_BYTES: usize = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubprocessResult {
    pub retcode: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl SubprocessResult {
    pub fn truncate_to_bound(mut self) -> Self {
        self.stdout.truncate(MAX_STREAM_BYTES);
        self.stderr.truncate(MAX_STREAM_BYTES);
        self
    }
}

/// One non-overlapping replacement in a `FixPlan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixEdit {
    pub filepath: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub new_bytes: Vec<u8>,
}

pub type FixPlan = Vec<FixEdit>;

#[cfg(test)]
mod tests {
    use super::*;

    fn base_finding() -> Finding {
        Finding {
            check_name: "c".into(),
            level: Level::Warning,
            message: Some("msg".into()),
            filepath: None,
            line: None,
            col: None,
            end_line: None,
            end_col: None,
            replacements: vec![],
        }
    }

    #[test]
    fn spanless_finding_with_message_is_valid() {
        assert!(base_finding().validate(false).is_ok());
    }

    #[test]
    fn span_requires_filepath() {
        let mut f = base_finding();
        f.line = Some(1);
        assert_eq!(f.validate(false), Err(FindingValidationError::SpanWithoutFilepath));
    }

    #[test]
    fn message_omission_requires_formatter_error_single_replacement() {
        let mut f = base_finding();
        f.message = None;
        f.filepath = Some("a.txt".into());
        f.level = Level::Error;
        f.replacements = vec!["x".into()];
        assert!(f.validate(true).is_ok());
        assert!(f.validate(false).is_err());
    }

    #[test]
    fn end_line_before_line_rejected() {
        let mut f = base_finding();
        f.filepath = Some("a.txt".into());
        f.line = Some(5);
        f.end_line = Some(4);
        assert_eq!(f.validate(false), Err(FindingValidationError::EndLineBeforeLine));
    }
}
