//! Fix planner (spec §4.H): converts a finding set into an ordered,
//! non-overlapping plan of in-file replacements.
//!
//! Wholly new relative to the teacher (whose `apply_fixes`/`fix_hdr013`
//! helpers were per-rule special cases); the one reused teacher idiom is
//! `atomic_write_lines`'s write-to-temp-then-rename pattern, reused here
//! for crash-safe application of the plan, plus `memchr` for the
//! line-offset table (`engine.rs`/`sql_lexer.rs` already lean on `memchr`
//! for line scanning).

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use memchr::memchr_iter;

use crate::error::{IoError, ShacError};
use crate::types::{Finding, FixEdit, FixPlan};
use crate::workspace::Workspace;

/// Build the ordered, non-overlapping fix plan for `findings` against the
/// on-disk content under `workspace`.
///
/// Tie-break among equally-positioned findings from different checks
/// (spec §9 open question #1) is resolved as ascending lexicographic
/// `check_name` order, folded into the sort key below and held stable.
pub fn plan(findings: &[Finding], workspace: &Workspace) -> Result<FixPlan, ShacError> {
    let mut by_file: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
    for finding in findings {
        if !finding.is_fix_eligible() {
            continue;
        }
        let Some(filepath) = finding.filepath.as_deref() else {
            continue;
        };
        by_file.entry(filepath).or_default().push(finding);
    }

    let mut edits = Vec::new();
    for (filepath, mut candidates) in by_file {
        // Whole-file (spanless) findings win outright (property 6). If more
        // than one targets the same file, the first in tie-break order wins.
        candidates.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        if let Some(whole_file) = candidates.iter().find(|f| f.line.is_none()) {
            let content = read_file(workspace, filepath)?;
            edits.push(FixEdit {
                filepath: filepath.to_string(),
                start_offset: 0,
                end_offset: content.len(),
                new_bytes: whole_file.replacements[0].clone().into_bytes(),
            });
            continue;
        }

        let content = read_file(workspace, filepath)?;
        let line_starts = line_start_offsets(&content);
        let mut accepted: Vec<(usize, usize)> = Vec::new();

        for finding in candidates {
            let Some((start, end)) = resolve_span(finding, &line_starts, content.len()) else {
                continue;
            };
            if accepted.iter().any(|&(a_start, a_end)| ranges_overlap(start, end, a_start, a_end)) {
                continue; // silently dropped (spec §4.H rule 2)
            }
            accepted.push((start, end));
            edits.push(FixEdit {
                filepath: filepath.to_string(),
                start_offset: start,
                end_offset: end,
                new_bytes: finding.replacements[0].clone().into_bytes(),
            });
        }
    }

    Ok(edits)
}

/// Deterministic ordering for fix-planner input: `(line, col, end_line,
/// end_col, check_name)`; spanless findings (`line == None`) sort first so
/// `candidates[0]` after a containing `find` is still a whole-file finding
/// when one exists.
fn sort_key(f: &Finding) -> (u32, u32, u32, u32, &str) {
    (
        f.line.unwrap_or(0),
        f.col.unwrap_or(0),
        f.end_line.unwrap_or(f.line.unwrap_or(0)),
        f.end_col.unwrap_or(f.col.unwrap_or(0)),
        f.check_name.as_str(),
    )
}

fn ranges_overlap(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start < b_end && b_start < a_end
}

/// Byte offset of the start of each 1-based line.
fn line_start_offsets(content: &[u8]) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(memchr_iter(b'\n', content).map(|i| i + 1));
    starts
}

/// Resolve a finding's `(line, col, end_line, end_col)` span to a byte
/// range against `line_starts`. `col == end_col` is a pure insertion
/// (spec §4.H rule 3).
fn resolve_span(
    finding: &Finding,
    line_starts: &[usize],
    content_len: usize,
) -> Option<(usize, usize)> {
    let line = finding.line?;
    let line_start = *line_starts.get((line - 1) as usize)?;
    let col = finding.col.unwrap_or(1);
    let start = line_start + (col - 1) as usize;

    let end_line = finding.end_line.unwrap_or(line);
    let end_col = finding.end_col.unwrap_or(col);
    let end_line_start = *line_starts.get((end_line - 1) as usize)?;
    let end = end_line_start + (end_col - 1) as usize;

    Some((start.min(content_len), end.min(content_len)))
}

fn read_file(workspace: &Workspace, filepath: &str) -> Result<Vec<u8>, ShacError> {
    let abs = workspace.resolve(filepath)?;
    std::fs::read(&abs).map_err(|_| IoError::NotFound(abs).into())
}

/// Apply a fix plan to disk, one file at a time, via the teacher's
/// write-to-temp-then-rename pattern (`atomic_write_lines` in `engine.rs`)
/// for crash safety.
pub fn apply(edits: &FixPlan, workspace: &Workspace) -> Result<(), ShacError> {
    let mut by_file: BTreeMap<&str, Vec<&FixEdit>> = BTreeMap::new();
    for edit in edits {
        by_file.entry(edit.filepath.as_str()).or_default().push(edit);
    }

    for (filepath, mut file_edits) in by_file {
        file_edits.sort_by_key(|e| e.start_offset);
        let abs = workspace.resolve(filepath)?;
        let original = std::fs::read(&abs).map_err(|_| IoError::NotFound(abs.clone()))?;

        let mut out = Vec::with_capacity(original.len());
        let mut cursor = 0;
        for edit in file_edits {
            out.extend_from_slice(&original[cursor..edit.start_offset]);
            out.extend_from_slice(&edit.new_bytes);
            cursor = edit.end_offset;
        }
        out.extend_from_slice(&original[cursor..]);

        atomic_write(&abs, &out)?;
    }
    Ok(())
}

fn atomic_write(path: &Path, content: &[u8]) -> Result<(), ShacError> {
    let fail = |e: String| IoError::WriteFailed { path: path.to_path_buf(), message: e }.into();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| fail(e.to_string()))?;
    tmp.write_all(content).map_err(|e| fail(e.to_string()))?;
    tmp.persist(path).map_err(|e| fail(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Level;

    fn finding(check: &str, line: u32, col: Option<u32>, end_col: Option<u32>, replacement: &str) -> Finding {
        Finding {
            check_name: check.to_string(),
            level: Level::Error,
            message: Some("m".to_string()),
            filepath: Some("file.txt".to_string()),
            line: Some(line),
            col,
            end_line: Some(line),
            end_col,
            replacements: vec![replacement.to_string()],
        }
    }

    fn whole_file_finding(check: &str, replacement: &str) -> Finding {
        Finding {
            check_name: check.to_string(),
            level: Level::Error,
            message: Some("m".to_string()),
            filepath: Some("file.txt".to_string()),
            line: None,
            col: None,
            end_line: None,
            end_col: None,
            replacements: vec![replacement.to_string()],
        }
    }

    fn workspace_with(content: &str) -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), content).unwrap();
        let ws = Workspace::new(dir.path());
        (dir, ws)
    }

    #[test]
    fn s2_single_formatter_replacement() {
        let (_dir, ws) = workspace_with("aaa\nbbb\nccc\n");
        let findings = vec![finding("fmt", 2, None, None, "BBB\n")];
        let edits = plan(&findings, &ws).unwrap();
        apply(&edits, &ws).unwrap();
        let out = std::fs::read_to_string(ws.root().join("file.txt")).unwrap();
        assert_eq!(out, "aaa\nBBB\nccc\n");
    }

    #[test]
    fn s3_insertion_at_col_is_before_that_character() {
        let (_dir, ws) = workspace_with("x\nhello\n");
        let findings = vec![finding("c", 2, Some(4), Some(4), " INSERTED")];
        let edits = plan(&findings, &ws).unwrap();
        apply(&edits, &ws).unwrap();
        let out = std::fs::read_to_string(ws.root().join("file.txt")).unwrap();
        assert_eq!(out, "x\nhel INSERTEDlo\n");
    }

    #[test]
    fn s4_conflict_first_in_order_wins() {
        let (_dir, ws) = workspace_with("aaa\n");
        let findings = vec![
            finding("zeta", 1, Some(1), Some(4), "ZZZ"),
            finding("alpha", 1, Some(1), Some(4), "AAA"),
        ];
        let edits = plan(&findings, &ws).unwrap();
        assert_eq!(edits.len(), 1);
        apply(&edits, &ws).unwrap();
        let out = std::fs::read_to_string(ws.root().join("file.txt")).unwrap();
        assert_eq!(out, "AAA\n");
    }

    #[test]
    fn s5_whole_file_overrides_others() {
        let (_dir, ws) = workspace_with("aaa\n");
        let findings = vec![whole_file_finding("c1", "X"), finding("c2", 1, Some(1), Some(4), "Y")];
        let edits = plan(&findings, &ws).unwrap();
        apply(&edits, &ws).unwrap();
        let out = std::fs::read_to_string(ws.root().join("file.txt")).unwrap();
        assert_eq!(out, "X");
    }

    #[test]
    fn plan_is_invariant_under_input_permutation() {
        let (_dir, ws) = workspace_with("aaa\nbbb\n");
        let forward = vec![
            finding("a", 1, Some(1), Some(4), "A"),
            finding("b", 2, Some(1), Some(4), "B"),
        ];
        let reversed: Vec<_> = forward.iter().cloned().rev().collect();
        let p1 = plan(&forward, &ws).unwrap();
        let p2 = plan(&reversed, &ws).unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn warnings_never_participate_in_fixes() {
        let mut f = finding("a", 1, Some(1), Some(4), "X");
        f.level = Level::Warning;
        let (_dir, ws) = workspace_with("aaa\n");
        let edits = plan(&[f], &ws).unwrap();
        assert!(edits.is_empty());
    }

    #[test]
    fn multi_replacement_findings_never_participate() {
        let mut f = finding("a", 1, Some(1), Some(4), "X");
        f.replacements.push("Y".to_string());
        let (_dir, ws) = workspace_with("aaa\n");
        let edits = plan(&[f], &ws).unwrap();
        assert!(edits.is_empty());
    }
}
