//! Passthrough backend for platforms with no sandboxing support (Windows,
//! anything else). Grounded on boxlite's `NoopSandbox`: launches the
//! command directly with the requested env and cwd, no isolation.

use std::process::{Command, Stdio};

use crate::error::{SandboxError, ShacError};
use crate::types::{SubprocessResult, SubprocessSpec};

use super::{Sandbox, SandboxContext, SandboxHandle};

pub struct PassthroughSandbox;

impl PassthroughSandbox {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PassthroughSandbox {
    fn default() -> Self {
        Self::new()
    }
}

struct PassthroughHandle {
    child: std::process::Child,
    stdin: Option<Vec<u8>>,
}

impl SandboxHandle for PassthroughHandle {
    fn wait(mut self: Box<Self>) -> Result<SubprocessResult, ShacError> {
        use std::io::Write;
        if let (Some(stdin_data), Some(mut stdin)) = (self.stdin.take(), self.child.stdin.take()) {
            let _ = stdin.write_all(&stdin_data);
        }
        let output = self
            .child
            .wait_with_output()
            .map_err(|e| SandboxError::LaunchFailed(e.to_string()))?;
        Ok(SubprocessResult {
            retcode: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        }
        .truncate_to_bound())
    }
}

impl Sandbox for PassthroughSandbox {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn is_available() -> bool {
        true
    }

    fn spawn(
        &self,
        spec: &SubprocessSpec,
        ctx: &SandboxContext,
    ) -> Result<Box<dyn SandboxHandle>, ShacError> {
        let [program, args @ ..] = spec.cmd.as_slice() else {
            return Err(SandboxError::LaunchFailed("empty cmd".to_string()).into());
        };
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(ctx.workspace_root.join(&spec.cwd))
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = command
            .spawn()
            .map_err(|e| SandboxError::LaunchFailed(e.to_string()))?;
        Ok(Box::new(PassthroughHandle { child, stdin: spec.stdin.clone() }))
    }
}
