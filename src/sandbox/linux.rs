//! Linux backend: wraps subprocesses with a prebuilt `nsjail` binary.
//!
//! Grounded on spec §4.A: mounts become `--bindmount`/`--bindmount_ro`,
//! sorted ascending by path so a parent mount precedes any child mount
//! sharing its prefix (nsjail requires this; testable property 7). Fixed
//! flags: quiet, forward_signals, disable_rlimits, disable_clone_newcgroup,
//! no time limit, explicit `--cwd`. Network is denied unless
//! `allow_network`, implemented as presence/absence of
//! `--disable_clone_newnet`. The host environment is never inherited —
//! only `--env K=V` entries reach the child.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{SandboxError, ShacError};
use crate::types::{SubprocessResult, SubprocessSpec};

use super::{PathAccess, Sandbox, SandboxContext, SandboxHandle, SANDBOX_HELPER_LOCK};

pub struct LinuxSandbox {
    nsjail_path: std::sync::OnceLock<PathBuf>,
}

impl LinuxSandbox {
    pub fn new() -> Self {
        Self { nsjail_path: std::sync::OnceLock::new() }
    }

    fn ensure_helper(&self) -> Result<PathBuf, ShacError> {
        if let Some(path) = self.nsjail_path.get() {
            return Ok(path.clone());
        }
        let _write_guard = SANDBOX_HELPER_LOCK.write().expect("sandbox helper lock poisoned");
        if let Some(path) = self.nsjail_path.get() {
            return Ok(path.clone());
        }
        let resolved = which_nsjail().ok_or_else(|| {
            SandboxError::HelperUnavailable(
                "nsjail not found on PATH and no override configured".to_string(),
            )
        })?;
        let _ = self.nsjail_path.set(resolved.clone());
        Ok(resolved)
    }
}

impl Default for LinuxSandbox {
    fn default() -> Self {
        Self::new()
    }
}

fn which_nsjail() -> Option<PathBuf> {
    if let Ok(override_path) = std::env::var("SHAC_NSJAIL_PATH") {
        let path = PathBuf::from(override_path);
        if path.is_file() {
            return Some(path);
        }
    }
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join("nsjail"))
            .find(|candidate| candidate.is_file())
    })
}

/// Sort mount paths ascending so a parent mount always precedes a child
/// mount sharing its prefix (nsjail's requirement, testable property 7).
pub fn sort_mounts(paths: &mut [PathAccess]) {
    paths.sort_by(|a, b| a.path.cmp(&b.path));
}

/// Walk `leaf` upward to `root`; for every symlink encountered, return the
/// pair (real target, original symlink path) so the caller can mount both
/// (spec §4.A FUSE/symlink handling, and §9 open question #3: applied
/// uniformly regardless of whether the filesystem is actually FUSE).
fn resolve_symlinks_upward(leaf: &Path, root: &Path) -> Vec<(PathBuf, PathBuf)> {
    let mut out = Vec::new();
    let mut current = leaf.to_path_buf();
    loop {
        if let Ok(target) = std::fs::read_link(&current) {
            let resolved = if target.is_absolute() {
                target
            } else {
                current.parent().unwrap_or(Path::new("/")).join(target)
            };
            out.push((resolved, current.clone()));
        }
        if current == root || !current.starts_with(root) {
            break;
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent.to_path_buf(),
            _ => break,
        }
    }
    out
}

/// Resolve the check's command to an absolute path so it can be mounted
/// implicitly read-only (spec §4.A: "the executable path itself is treated
/// as an implicit read-only mount"). Bare names (no path separator) are
/// looked up on `PATH`; already-absolute or relative paths are used as-is.
fn executable_path(cmd: &[String]) -> Option<PathBuf> {
    let program = cmd.first()?;
    if program.contains('/') {
        return Some(PathBuf::from(program));
    }
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    })
}

fn expand_mounts_for_symlinks(paths: &[PathAccess], root: &Path) -> Vec<PathAccess> {
    let mut expanded = paths.to_vec();
    for access in paths {
        if !access.path.starts_with(root) {
            continue; // outside workspace root: pass through unresolved
        }
        for (target, original) in resolve_symlinks_upward(&access.path, root) {
            expanded.push(PathAccess { path: target, writable: access.writable });
            expanded.push(PathAccess { path: original, writable: access.writable });
        }
    }
    expanded
}

struct LinuxHandle {
    child: std::process::Child,
    stdin: Option<Vec<u8>>,
}

impl SandboxHandle for LinuxHandle {
    fn wait(mut self: Box<Self>) -> Result<SubprocessResult, ShacError> {
        if let (Some(data), Some(mut stdin)) = (self.stdin.take(), self.child.stdin.take()) {
            let _ = stdin.write_all(&data);
        }
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(mut out) = self.child.stdout.take() {
            let _ = out.read_to_end(&mut stdout);
        }
        if let Some(mut err) = self.child.stderr.take() {
            let _ = err.read_to_end(&mut stderr);
        }
        let status = self
            .child
            .wait()
            .map_err(|e| SandboxError::LaunchFailed(e.to_string()))?;
        Ok(SubprocessResult { retcode: status.code().unwrap_or(-1), stdout, stderr }.truncate_to_bound())
    }
}

impl Sandbox for LinuxSandbox {
    fn name(&self) -> &'static str {
        "nsjail"
    }

    fn is_available() -> bool {
        which_nsjail().is_some()
    }

    fn spawn(
        &self,
        spec: &SubprocessSpec,
        ctx: &SandboxContext,
    ) -> Result<Box<dyn SandboxHandle>, ShacError> {
        let helper = self.ensure_helper()?;
        let _read_guard = SANDBOX_HELPER_LOCK.read().expect("sandbox helper lock poisoned");

        let workspace_root = ctx.workspace_root.clone();

        let mut all_paths = ctx.paths.clone();
        if let Some(exe) = executable_path(&spec.cmd) {
            all_paths.push(PathAccess { path: exe, writable: false });
        }
        let mut mounts = expand_mounts_for_symlinks(&all_paths, &workspace_root);
        sort_mounts(&mut mounts);

        let mut args: Vec<String> = vec![
            "--quiet".into(),
            "--forward_signals".into(),
            "--disable_rlimits".into(),
            "--disable_clone_newcgroup".into(),
            "--cwd".into(),
            workspace_root.join(&spec.cwd).display().to_string(),
        ];
        if !(spec.allow_network && ctx.network_enabled) {
            args.push("--disable_clone_newnet".into());
        }
        for mount in &mounts {
            let flag = if mount.writable { "--bindmount" } else { "--bindmount_ro" };
            args.push(flag.into());
            args.push(mount.path.display().to_string());
        }
        for (key, value) in &spec.env {
            args.push("--env".into());
            args.push(format!("{key}={value}"));
        }
        args.push("--".into());
        args.extend(spec.cmd.iter().cloned());

        let child = Command::new(&helper)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .spawn()
            .map_err(|e| SandboxError::LaunchFailed(e.to_string()))?;

        Ok(Box::new(LinuxHandle { child, stdin: spec.stdin.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_mounts_puts_parents_before_children() {
        let mut mounts = vec![
            PathAccess { path: "/a/b/c".into(), writable: false },
            PathAccess { path: "/a".into(), writable: true },
            PathAccess { path: "/a/b".into(), writable: false },
        ];
        sort_mounts(&mut mounts);
        let ordered: Vec<_> = mounts.iter().map(|m| m.path.display().to_string()).collect();
        assert_eq!(ordered, vec!["/a", "/a/b", "/a/b/c"]);
    }

    #[test]
    fn executable_path_passes_through_paths_with_a_separator() {
        let cmd = vec!["/usr/bin/env".to_string(), "echo".to_string()];
        assert_eq!(executable_path(&cmd), Some(PathBuf::from("/usr/bin/env")));
    }

    #[test]
    fn executable_path_resolves_bare_names_on_path() {
        let cmd = vec!["ls".to_string()];
        let resolved = executable_path(&cmd);
        assert!(resolved.is_some());
        assert!(resolved.unwrap().is_absolute());
    }
}
