//! Sandbox (spec §4.A): a platform-appropriate subprocess launcher with
//! mount/env/network policy.
//!
//! Grounded on the `Sandbox` trait shape from the boxlite jailer
//! (`is_available`/`setup`/`wrap`/`name`) and its `PathAccess`/
//! `SandboxContext` structs, generalized to the mount/env/network policy
//! spec §4.A and §6 require. Three backends are selected at construction
//! time by platform: `linux` (nsjail), `macos` (sandbox-exec), `other`
//! (passthrough, no isolation).

pub mod linux;
pub mod macos;
pub mod other;

use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::error::ShacError;
use crate::types::{SubprocessResult, SubprocessSpec};

/// One filesystem path visible inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAccess {
    pub path: std::path::PathBuf,
    pub writable: bool,
}

/// Resource limits are accepted and threaded through but are not enforced
/// by any of shac's three backends today — kept on `SandboxContext` as an
/// unused, forward-compatible field, matching the boxlite source this
/// struct is grounded on (documented in DESIGN.md rather than silently
/// dropped).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_memory_bytes: Option<u64>,
    pub max_cpu_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SandboxContext {
    pub id: String,
    pub workspace_root: std::path::PathBuf,
    pub paths: Vec<PathAccess>,
    pub resource_limits: ResourceLimits,
    pub network_enabled: bool,
}

impl SandboxContext {
    pub fn writable_paths(&self) -> impl Iterator<Item = &PathAccess> {
        self.paths.iter().filter(|p| p.writable)
    }

    pub fn readonly_paths(&self) -> impl Iterator<Item = &PathAccess> {
        self.paths.iter().filter(|p| !p.writable)
    }
}

/// A running subprocess, returned by `Sandbox::spawn`.
pub trait SandboxHandle: Send {
    fn wait(self: Box<Self>) -> Result<SubprocessResult, ShacError>;
}

/// A platform-appropriate subprocess launcher.
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_available() -> bool
    where
        Self: Sized;
    fn spawn(
        &self,
        spec: &SubprocessSpec,
        ctx: &SandboxContext,
    ) -> Result<Box<dyn SandboxHandle>, ShacError>;
}

/// Fork safety (spec §4.A, §9): subprocess start is serialized against
/// writes to the sandbox helper executable via a process-wide RW-lock —
/// every `spawn` takes the read side, the one-time helper-path resolution
/// takes the write side. Matters only when many engines share one host
/// process (test suites); in a production single-run binary this
/// degenerates to one write-lock acquisition.
pub static SANDBOX_HELPER_LOCK: Lazy<RwLock<()>> = Lazy::new(|| RwLock::new(()));

/// Select the sandbox backend for the current platform.
pub fn platform_sandbox() -> Box<dyn Sandbox> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::LinuxSandbox::new())
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::MacosSandbox::new())
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Box::new(other::PassthroughSandbox::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_access_split_by_writability() {
        let ctx = SandboxContext {
            id: "c1".into(),
            workspace_root: "/tmp".into(),
            paths: vec![
                PathAccess { path: "/a".into(), writable: true },
                PathAccess { path: "/b".into(), writable: false },
            ],
            resource_limits: ResourceLimits::default(),
            network_enabled: false,
        };
        assert_eq!(ctx.writable_paths().count(), 1);
        assert_eq!(ctx.readonly_paths().count(), 1);
    }
}
