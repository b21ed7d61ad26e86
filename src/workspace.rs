//! The workspace root and path-containment enforcement.
//!
//! Every path exchanged with a check — `ctx.io.*`, `ctx.emit.finding`,
//! `ctx.scm.*` — must canonicalize to a relative, POSIX-separated path that
//! lies within the workspace root (testable property 1). This module is the
//! single place that rule is enforced so the host API bindings never have
//! to reimplement it.

use std::path::{Component, Path, PathBuf};

use crate::error::{IoError, ShacError};

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative, POSIX-separated path to an absolute
    /// path, rejecting anything that escapes the root.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, ShacError> {
        let rel_path = Path::new(rel);
        if rel_path.is_absolute() {
            return Err(IoError::OutsideWorkspace(rel_path.to_path_buf()).into());
        }
        let mut out = self.root.clone();
        for component in rel_path.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !out.pop() || !out.starts_with(&self.root) {
                        return Err(IoError::OutsideWorkspace(rel_path.to_path_buf()).into());
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(IoError::OutsideWorkspace(rel_path.to_path_buf()).into());
                }
            }
        }
        if !out.starts_with(&self.root) {
            return Err(IoError::OutsideWorkspace(rel_path.to_path_buf()).into());
        }
        Ok(out)
    }

    /// Convert an absolute path (already known to be under the root) to a
    /// relative, POSIX-separated workspace path.
    pub fn relativize(&self, abs: &Path) -> Result<String, ShacError> {
        let rel = abs
            .strip_prefix(&self.root)
            .map_err(|_| IoError::OutsideWorkspace(abs.to_path_buf()))?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => {
                    parts.push(part.to_string_lossy().into_owned());
                }
                _ => return Err(IoError::OutsideWorkspace(abs.to_path_buf()).into()),
            }
        }
        Ok(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_simple_relative_path() {
        let ws = Workspace::new("/tmp/ws");
        assert_eq!(ws.resolve("a/b.txt").unwrap(), PathBuf::from("/tmp/ws/a/b.txt"));
    }

    #[test]
    fn rejects_parent_escape() {
        let ws = Workspace::new("/tmp/ws");
        assert!(ws.resolve("../outside").is_err());
        assert!(ws.resolve("a/../../outside").is_err());
    }

    #[test]
    fn rejects_absolute_path() {
        let ws = Workspace::new("/tmp/ws");
        assert!(ws.resolve("/etc/passwd").is_err());
    }

    #[test]
    fn allows_dotdot_that_stays_inside() {
        let ws = Workspace::new("/tmp/ws");
        assert_eq!(ws.resolve("a/../b").unwrap(), PathBuf::from("/tmp/ws/b"));
    }

    #[test]
    fn relativize_round_trips() {
        let ws = Workspace::new("/tmp/ws");
        let abs = ws.resolve("a/b.txt").unwrap();
        assert_eq!(ws.relativize(&abs).unwrap(), "a/b.txt");
    }
}
