//! Error taxonomy for the engine.
//!
//! Every error surfaced by this crate is one of the seven kinds below. Each
//! kind carries enough context to render a useful message without the
//! caller needing to downcast further. `CheckError` is the one kind that
//! never propagates past a single check (see `engine::Engine`); every other
//! kind terminates the run.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShacError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Check(#[from] CheckError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Scm(#[from] ScmError),
}

impl ShacError {
    /// The stable category label from spec §7, for logging and `--json-output`.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Usage(_) => "UsageError",
            Self::Config(_) => "ConfigError",
            Self::Load(_) => "LoadError",
            Self::Check(_) => "CheckError",
            Self::Sandbox(_) => "SandboxError",
            Self::Io(_) => "IOError",
            Self::Scm(_) => "SCMError",
        }
    }
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("unknown check name: {0}")]
    UnknownCheck(String),
    #[error("--all and positional file arguments are mutually exclusive")]
    AllAndFiles,
    #[error("applying the formatter filter left zero checks to run")]
    NoChecksSelected,
    #[error("no subcommand given")]
    NoSubcommand,
    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),
    #[error("bad argument: {0}")]
    BadArgument(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config at {path:?}: unknown field {field:?}")]
    UnknownField { path: PathBuf, field: String },
    #[error("config at {path:?}: duplicate key {key:?}")]
    DuplicateKey { path: PathBuf, key: String },
    #[error("config at {path:?}: {message}")]
    Invalid { path: PathBuf, message: String },
    #[error("project requires shac >= {required}, running {actual}")]
    MinVersion { required: String, actual: String },
    #[error("alias {0:?} is not declared in config")]
    UnknownAlias(String),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{module}: {message}")]
    ParseOrEval { module: String, message: String },
    #[error("{module}: fail() called at module scope: {message}")]
    Fail { module: String, message: String },
    #[error("load() target not found: {0}")]
    Unresolved(String),
    #[error("load() cycle detected at {0}")]
    Cycle(String),
    #[error("external load path {0:?} must not contain '..' or an 'internal' segment")]
    ExternalPathRejected(String),
    #[error("shac.register_check called outside phase 1")]
    RegisterAfterPhase1,
    #[error("ctx is not available during phase 1")]
    CtxUnavailableInPhase1,
    #[error("duplicate check name: {0}")]
    DuplicateCheckName(String),
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{check}: fail() called: {message}")]
    Fail { check: String, message: String },
    #[error("{check}: subprocess exited {retcode}, not in ok_retcodes")]
    SubprocessRetcode { check: String, retcode: i32 },
    #[error("{check}: invalid ctx.emit.finding arguments: {message}")]
    InvalidFinding { check: String, message: String },
    #[error("{check}: panicked: {message}")]
    Panicked { check: String, message: String },
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to launch subprocess: {0}")]
    LaunchFailed(String),
    #[error("failed to locate or extract sandbox helper: {0}")]
    HelperUnavailable(String),
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("path not found: {0}")]
    NotFound(PathBuf),
    #[error("path {0:?} lies outside the workspace root")]
    OutsideWorkspace(PathBuf),
    #[error("read of {path:?} exceeded truncation bound of {bound} bytes")]
    TruncationBound { path: PathBuf, bound: usize },
    #[error("failed to write {path:?}: {message}")]
    WriteFailed { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum ScmError {
    #[error("git probe failed: {0}")]
    GitFailed(String),
}
