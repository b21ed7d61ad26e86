//! Finding store (spec §4.G): a thread-safe collector of `Finding`s and
//! `Artifact`s emitted by concurrently running checks.
//!
//! Grounded on `reporter.rs`'s sort-before-serialize instinct, generalized
//! from "sort once at the end of a single-threaded run" to "accept
//! concurrent pushes, then sort once at report time".

use std::sync::Mutex;

use crate::types::{Artifact, Finding};

/// Append-only, thread-safe store shared by every check running in phase 2.
pub struct FindingStore {
    findings: Mutex<Vec<Finding>>,
    artifacts: Mutex<Vec<Artifact>>,
}

impl FindingStore {
    pub fn new() -> Self {
        Self { findings: Mutex::new(Vec::new()), artifacts: Mutex::new(Vec::new()) }
    }

    /// Append a finding, dropping it silently if an identical one (same
    /// check, filepath, span, message, replacements) is already stored.
    pub fn push(&self, finding: Finding) {
        let mut guard = self.findings.lock().expect("finding store lock poisoned");
        if guard.iter().any(|existing| is_duplicate(existing, &finding)) {
            return;
        }
        guard.push(finding);
    }

    pub fn push_artifact(&self, artifact: Artifact) {
        self.artifacts.lock().expect("artifact store lock poisoned").push(artifact);
    }

    /// Findings emitted so far by one check, in emission order — used by
    /// the engine to attach a scoped `CheckError` finding without
    /// disturbing the findings that check already emitted.
    pub fn for_check(&self, check_name: &str) -> Vec<Finding> {
        self.findings
            .lock()
            .expect("finding store lock poisoned")
            .iter()
            .filter(|f| f.check_name == check_name)
            .cloned()
            .collect()
    }

    /// Final reporting order (spec §4.G): `(check_name, filepath, line, col)`,
    /// with spanless findings sorting first within their file.
    pub fn into_sorted_vec(self) -> Vec<Finding> {
        let mut findings = self.findings.into_inner().expect("finding store lock poisoned");
        findings.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        findings
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts.lock().expect("artifact store lock poisoned").clone()
    }
}

impl Default for FindingStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_key(f: &Finding) -> (&str, &str, u32, u32) {
    (
        f.check_name.as_str(),
        f.filepath.as_deref().unwrap_or(""),
        f.line.unwrap_or(0),
        f.col.unwrap_or(0),
    )
}

fn is_duplicate(a: &Finding, b: &Finding) -> bool {
    a.check_name == b.check_name
        && a.filepath == b.filepath
        && a.line == b.line
        && a.col == b.col
        && a.end_line == b.end_line
        && a.end_col == b.end_col
        && a.message == b.message
        && a.replacements == b.replacements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Level;

    fn finding(check: &str, msg: &str) -> Finding {
        Finding {
            check_name: check.to_string(),
            level: Level::Warning,
            message: Some(msg.to_string()),
            filepath: Some("a.txt".to_string()),
            line: Some(1),
            col: None,
            end_line: None,
            end_col: None,
            replacements: vec![],
        }
    }

    #[test]
    fn duplicate_push_is_collapsed() {
        let store = FindingStore::new();
        store.push(finding("c", "m"));
        store.push(finding("c", "m"));
        assert_eq!(store.into_sorted_vec().len(), 1);
    }

    #[test]
    fn sort_orders_by_check_then_file_then_span() {
        let store = FindingStore::new();
        store.push(finding("zeta", "m1"));
        store.push(finding("alpha", "m2"));
        let sorted = store.into_sorted_vec();
        assert_eq!(sorted[0].check_name, "alpha");
        assert_eq!(sorted[1].check_name, "zeta");
    }

    #[test]
    fn for_check_filters_by_owning_check() {
        let store = FindingStore::new();
        store.push(finding("a", "m1"));
        store.push(finding("b", "m2"));
        assert_eq!(store.for_check("a").len(), 1);
    }
}
