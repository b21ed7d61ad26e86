//! Package/module loader (spec §4.C): resolves `load()` targets (relative,
//! workspace-root `//`, external `@alias`) against the config-declared
//! alias table, and caches parsed, frozen modules.
//!
//! `ModuleLoader` backs `starlark::environment::FileLoader`, the extension
//! point the `starlark` crate exposes for exactly this purpose — evaluating
//! a module's `load(...)` statements calls back into a `FileLoader` built
//! on top of this cache (`engine::EngineFileLoader`), which resolves the
//! five forms from spec §4.C via `resolve` below, then consults (and
//! populates) the frozen-module cache.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use starlark::environment::FrozenModule;

use crate::error::{LoadError, ShacError};

/// A module's canonical identity: alias-resolved, root-relative, POSIX
/// path. Two `load()` statements that resolve to the same `CanonicalPath`
/// share one cached, frozen module (spec §4.C: "each module is loaded at
/// most once per engine run").
pub type CanonicalPath = String;

/// Resolve a `load()` target string against the calling module's directory
/// and the config's alias table, producing the five forms spec §4.C
/// describes. Does not touch the filesystem or the module cache — callers
/// combine this with `ModuleLoader` for the full resolve-then-load flow.
pub fn resolve(
    calling_module_dir: &str,
    target: &str,
    aliases: &BTreeMap<String, String>,
) -> Result<CanonicalPath, ShacError> {
    if let Some(rest) = target.strip_prefix("//") {
        return Ok(normalize_root_relative(rest));
    }

    if let Some(rest) = target.strip_prefix('@') {
        let (alias, path) = match rest.split_once("//") {
            Some((alias, path)) => (alias, Some(path)),
            None => (rest, None),
        };
        let uri = aliases
            .get(alias)
            .ok_or_else(|| LoadError::Unresolved(format!("@{alias}")))?;
        return match path {
            None => Ok(format!("{uri}//api.star")),
            Some(path) => {
                reject_external_path(path)?;
                Ok(format!("{uri}//{path}"))
            }
        };
    }

    if target.contains("://") {
        let (uri, path) = match target.split_once("//") {
            Some((uri, path)) if !path.is_empty() => (uri, Some(path)),
            _ => (target, None),
        };
        return match path {
            None => Ok(format!("{uri}//api.star")),
            Some(path) => {
                reject_external_path(path)?;
                Ok(format!("{uri}//{path}"))
            }
        };
    }

    // Bare relative path, resolved against the calling module's directory
    // and constrained to the workspace root.
    let joined = if calling_module_dir.is_empty() {
        target.to_string()
    } else {
        format!("{calling_module_dir}/{target}")
    };
    Ok(normalize_root_relative(&joined))
}

/// Collapse `.`/`..` components in a workspace-root-relative path,
/// rejecting any escape above the root (path containment, property 1).
fn normalize_root_relative(path: &str) -> CanonicalPath {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn reject_external_path(path: &str) -> Result<(), ShacError> {
    for segment in path.split('/') {
        if segment == ".." || segment == "internal" {
            return Err(LoadError::ExternalPathRejected(path.to_string()).into());
        }
    }
    Ok(())
}

/// Owns the frozen-module cache and in-flight set used for cycle
/// detection. One `ModuleLoader` lives for the duration of one engine run.
pub struct ModuleLoader {
    root: PathBuf,
    aliases: BTreeMap<String, String>,
    cache: Mutex<BTreeMap<CanonicalPath, FrozenModule>>,
    in_flight: Mutex<HashSet<CanonicalPath>>,
}

impl ModuleLoader {
    pub fn new(root: impl Into<PathBuf>, aliases: BTreeMap<String, String>) -> Self {
        Self {
            root: root.into(),
            aliases,
            cache: Mutex::new(BTreeMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `target` relative to `calling_module`'s canonical path.
    pub fn resolve_from(
        &self,
        calling_module: &str,
        target: &str,
    ) -> Result<CanonicalPath, ShacError> {
        let dir = Path::new(calling_module)
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        resolve(&dir, target, &self.aliases)
    }

    /// Absolute filesystem path for a canonical, workspace-relative module
    /// path, for reading the module's source text.
    pub fn source_path(&self, canonical: &CanonicalPath) -> PathBuf {
        self.root.join(canonical)
    }

    /// Mark `canonical` as currently loading; rejects a cycle (spec §4.C).
    pub fn enter(&self, canonical: &CanonicalPath) -> Result<(), ShacError> {
        let mut in_flight = self.in_flight.lock().expect("module loader lock poisoned");
        if !in_flight.insert(canonical.clone()) {
            return Err(LoadError::Cycle(canonical.clone()).into());
        }
        Ok(())
    }

    pub fn leave(&self, canonical: &CanonicalPath) {
        self.in_flight.lock().expect("module loader lock poisoned").remove(canonical);
    }

    pub fn get_cached(&self, canonical: &CanonicalPath) -> Option<FrozenModule> {
        self.cache.lock().expect("module loader lock poisoned").get(canonical).cloned()
    }

    pub fn insert_cached(&self, canonical: CanonicalPath, module: FrozenModule) {
        self.cache.lock().expect("module loader lock poisoned").insert(canonical, module);
    }

    /// Every canonical path loaded so far this run, for the engine's
    /// end-of-phase-1 sweep collecting check registrations out of every
    /// module that was evaluated (entry points and their transitive
    /// dependencies alike).
    pub fn cached_paths(&self) -> Vec<CanonicalPath> {
        self.cache.lock().expect("module loader lock poisoned").keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("rules".to_string(), "https://example.com/rules".to_string());
        m
    }

    #[test]
    fn bare_relative_path_resolves_against_caller_dir() {
        let resolved = resolve("a/b", "c.star", &aliases()).unwrap();
        assert_eq!(resolved, "a/b/c.star");
    }

    #[test]
    fn bare_relative_path_can_walk_up() {
        let resolved = resolve("a/b", "../c.star", &aliases()).unwrap();
        assert_eq!(resolved, "a/c.star");
    }

    #[test]
    fn workspace_root_absolute_path() {
        let resolved = resolve("a/b", "//x/y.star", &aliases()).unwrap();
        assert_eq!(resolved, "x/y.star");
    }

    #[test]
    fn alias_without_path_loads_api_star() {
        let resolved = resolve("", "@rules", &aliases()).unwrap();
        assert_eq!(resolved, "https://example.com/rules//api.star");
    }

    #[test]
    fn alias_with_path() {
        let resolved = resolve("", "@rules//checks/a.star", &aliases()).unwrap();
        assert_eq!(resolved, "https://example.com/rules//checks/a.star");
    }

    #[test]
    fn unresolved_alias_is_error() {
        assert!(resolve("", "@nope", &aliases()).is_err());
    }

    #[test]
    fn external_path_rejects_dotdot() {
        assert!(resolve("", "@rules//../x.star", &aliases()).is_err());
    }

    #[test]
    fn external_path_rejects_internal_segment() {
        assert!(resolve("", "@rules//internal/x.star", &aliases()).is_err());
    }

    #[test]
    fn fully_qualified_uri_with_path() {
        let resolved = resolve("", "https://example.com/pkg//a.star", &aliases()).unwrap();
        assert_eq!(resolved, "https://example.com/pkg//a.star");
    }

    #[test]
    fn cycle_detection_rejects_reentry() {
        let loader = ModuleLoader::new("/tmp/ws", BTreeMap::new());
        loader.enter(&"a.star".to_string()).unwrap();
        assert!(loader.enter(&"a.star".to_string()).is_err());
        loader.leave(&"a.star".to_string());
        assert!(loader.enter(&"a.star".to_string()).is_ok());
    }
}
