//! macOS backend: wraps the command with the platform's built-in sandbox
//! policy launcher (`sandbox-exec`) using an inline profile. Filesystem
//! mount policy is not enforced — a documented limitation carried directly
//! from spec §4.A.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{SandboxError, ShacError};
use crate::types::{SubprocessResult, SubprocessSpec};

use super::{Sandbox, SandboxContext, SandboxHandle};

pub struct MacosSandbox;

impl MacosSandbox {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MacosSandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// `(version 1) (allow default)` plus `(deny network*)` when network is
/// disallowed.
pub fn build_profile(allow_network: bool) -> String {
    if allow_network {
        "(version 1)\n(allow default)\n".to_string()
    } else {
        "(version 1)\n(allow default)\n(deny network*)\n".to_string()
    }
}

struct MacosHandle {
    child: std::process::Child,
    stdin: Option<Vec<u8>>,
}

impl SandboxHandle for MacosHandle {
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

impl Sandbox for MacosSandbox {
    fn name(&self) -> &'static str {
        "sandbox-exec"
    }

    fn is_available() -> bool {
        Path::new("/usr/bin/sandbox-exec").is_file()
    }

    fn spawn(
        &self,
        spec: &SubprocessSpec,
        ctx: &SandboxContext,
    ) -> Result<Box<dyn SandboxHandle>, ShacError> {
        let profile = build_profile(spec.allow_network && ctx.network_enabled);
        let mut args = vec!["-p".to_string(), profile];
        args.extend(spec.cmd.iter().cloned());

        let child = Command::new("/usr/bin/sandbox-exec")
            .args(&args)
            .current_dir(ctx.workspace_root.join(&spec.cwd))
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SandboxError::LaunchFailed(e.to_string()))?;

        Ok(Box::new(MacosHandle { child, stdin: spec.stdin.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_denies_network_by_default() {
        assert!(build_profile(false).contains("(deny network*)"));
        assert!(!build_profile(true).contains("(deny network*)"));
    }
}
