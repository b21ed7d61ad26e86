//! Check engine orchestrator (spec §4.F): drives phase 1 (load) then phase 2
//! (execute) for one run of `shac check`/`fmt`/`fix`.
//!
//! Phase 1 keeps the teacher's single-threaded "discover, then evaluate"
//! shape but replaces the teacher's checker-struct registry with recursive
//! Starlark module loading: each entry point is parsed and evaluated via
//! `starlark::syntax::AstModule` + `starlark::eval::Evaluator`, with a fresh
//! `RegistrationList` attached through `Module::set_extra_value` before
//! evaluation and read back out via `FrozenModule::extra_value()` once the
//! module is frozen. Dependencies named in `load()` statements are resolved
//! lazily and recursively by `EngineFileLoader`, the sole driver of
//! `loader::ModuleLoader`'s cache — it both populates the cache on first
//! load and serves already-frozen modules on repeat references.
//!
//! Phase 2 directly generalizes the teacher's `rayon` `par_iter()` +
//! `catch_unwind(AssertUnwindSafe(...))` per-file dispatch into a
//! one-closure-per-check dispatch, with a fresh `ctx` built per check.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use rayon::prelude::*;
use starlark::environment::{FileLoader, Globals, Module};
use starlark::eval::Evaluator;
use starlark::syntax::{AstModule, Dialect};

use crate::config::Config;
use crate::error::{CheckError, LoadError, ShacError};
use crate::findings::FindingStore;
use crate::fixplan;
use crate::hostapi::ctx::CtxValue;
use crate::hostapi::shac_global::{build_phase1_globals, FrozenRegistrationList, PhaseGate, RegistrationList};
use crate::hostapi::{CheckToken, HostState};
use crate::loader::{CanonicalPath, ModuleLoader};
use crate::registry::{CheckDef, CheckRegistry, FormatterFilter};
use crate::sandbox::{PathAccess, ResourceLimits, Sandbox, SandboxContext};
use crate::scm::{GitScmProbe, RestrictedScmProbe, ScmProbe};
use crate::types::{Artifact, Finding, FixPlan, Level};
use crate::workspace::Workspace;

/// Which of the three CLI subcommands is driving this run; determines the
/// formatter filter applied before phase 2 and whether a resulting fix plan
/// is applied to disk (spec §4.E, §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Check,
    Fmt,
    Fix,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Check
    }
}

impl RunMode {
    fn formatter_filter(self) -> FormatterFilter {
        match self {
            RunMode::Check => FormatterFilter::All,
            RunMode::Fmt => FormatterFilter::OnlyFormatters,
            RunMode::Fix => FormatterFilter::ExcludeFormatters,
        }
    }

    fn applies_fix(self) -> bool {
        matches!(self, RunMode::Fmt | RunMode::Fix)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub mode: RunMode,
    pub entrypoint_basename: String,
    pub recurse: bool,
    pub only: Option<Vec<String>>,
    pub skip: Vec<String>,
    pub var_values: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct EngineOutcome {
    pub findings: Vec<Finding>,
    pub artifacts: Vec<Artifact>,
    pub checks_failed: Vec<String>,
    pub fix_plan: Option<FixPlan>,
}

impl EngineOutcome {
    /// Exit code per spec §6: 1 if any error-level finding or abnormal check
    /// failure, 0 otherwise. Usage/load errors short-circuit earlier via
    /// `Result::Err` and never reach this.
    pub fn exit_code(&self) -> i32 {
        let has_error_finding = self.findings.iter().any(|f| f.level == Level::Error);
        if has_error_finding || !self.checks_failed.is_empty() {
            1
        } else {
            0
        }
    }
}

pub struct Engine {
    workspace: Arc<Workspace>,
    config: Arc<Config>,
    scm: Arc<dyn ScmProbe>,
    sandbox: Arc<dyn Sandbox>,
}

impl Engine {
    pub fn new(workspace: Workspace, config: Config, all_files_override: bool) -> Self {
        Self::with_files(workspace, config, all_files_override, Vec::new())
    }

    /// Like `new`, but restricts `ctx.scm.affected_files`/`all_files` (and
    /// therefore the positional-file behavior of `shac check|fmt|fix
    /// [files...]`, spec §6) to paths under the given workspace-relative
    /// prefixes. An empty list means "no restriction".
    pub fn with_files(workspace: Workspace, config: Config, all_files_override: bool, files: Vec<String>) -> Self {
        let probe: Arc<dyn ScmProbe> =
            Arc::new(GitScmProbe::new(workspace.root(), config.clone(), all_files_override));
        let scm: Arc<dyn ScmProbe> =
            if files.is_empty() { probe } else { Arc::new(RestrictedScmProbe::new(probe, files)) };
        Self {
            workspace: Arc::new(workspace),
            config: Arc::new(config),
            scm,
            sandbox: Arc::from(crate::sandbox::platform_sandbox()),
        }
    }

    pub fn run(&self, options: &RunOptions) -> Result<EngineOutcome, ShacError> {
        let registry = self.load_phase(options)?;
        let selected: Vec<CheckDef> = registry
            .select(options.only.as_deref(), &options.skip, options.mode.formatter_filter())?
            .into_iter()
            .cloned()
            .collect();

        let (findings_store, checks_failed) = self.execute_phase(&selected, options)?;
        let artifacts = findings_store.artifacts();
        let findings = findings_store.into_sorted_vec();

        let fix_plan = if options.mode.applies_fix() {
            let plan = fixplan::plan(&findings, &self.workspace)?;
            fixplan::apply(&plan, &self.workspace)?;
            Some(plan)
        } else {
            None
        };

        Ok(EngineOutcome { findings, artifacts, checks_failed, fix_plan })
    }

    /// Phase 1 (spec §4.F): single-threaded discovery, parse, eval, and
    /// registration collection across every entry point and its transitive
    /// `load()` dependencies. `fail()`/parse/eval errors abort the whole
    /// run, not just one module.
    fn load_phase(&self, options: &RunOptions) -> Result<CheckRegistry, ShacError> {
        let entry_points = discover_entry_points(
            self.workspace.root(),
            &options.entrypoint_basename,
            options.recurse,
            &self.config,
        )?;

        let gate = PhaseGate::new();
        let commit_hash = option_env!("SHAC_COMMIT_HASH").unwrap_or("unknown").to_string();
        let globals = build_phase1_globals(gate.clone(), commit_hash);
        let module_loader = ModuleLoader::new(self.workspace.root(), self.config.aliases.clone());

        for entry in &entry_points {
            let canonical = self
                .workspace
                .relativize(entry)
                .unwrap_or_else(|_| entry.to_string_lossy().into_owned());
            load_module_recursive(&module_loader, &globals, &canonical)?;
        }

        gate.close();

        // Collect registrations from every module actually loaded this run
        // (entry points and transitive dependencies alike) — a library
        // module is free to call `shac.register_check()` at its own module
        // scope just as an entry point can (spec §9 open question).
        let mut registry = CheckRegistry::new();
        let mut loaded_paths = module_loader.cached_paths();
        loaded_paths.sort();
        for canonical in &loaded_paths {
            let Some(frozen) = module_loader.get_cached(canonical) else { continue };
            let Some(extra) = frozen.extra_value() else { continue };
            let Some(list) = extra.downcast_ref::<FrozenRegistrationList>() else { continue };
            for reg in &list.entries {
                registry.register(CheckDef {
                    name: reg.name.clone(),
                    callable: reg.callable,
                    formatter: reg.formatter,
                    bound_kwargs: reg.bound_kwargs.clone(),
                })?;
            }
        }
        Ok(registry)
    }

    /// Phase 2 (spec §4.F): a `rayon` thread pool runs each selected check
    /// inside `catch_unwind`, with a fresh `ctx`/scratch dir/sandbox context
    /// per check.
    fn execute_phase(
        &self,
        selected: &[CheckDef],
        options: &RunOptions,
    ) -> Result<(FindingStore, Vec<String>), ShacError> {
        let findings = Arc::new(FindingStore::new());
        let var_values = Arc::new(options.var_values.clone());
        let scratch_root = tempfile::tempdir().map_err(|e| crate::error::IoError::WriteFailed {
            path: PathBuf::from("<scratch>"),
            message: e.to_string(),
        })?;
        let failed: std::sync::Mutex<Vec<String>> = std::sync::Mutex::new(Vec::new());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .build()
            .map_err(|e| crate::error::SandboxError::LaunchFailed(e.to_string()))?;

        pool.install(|| {
            selected.par_iter().for_each(|check| {
                let token = CheckToken(check_token_for(&check.name));
                let scratch_dir = scratch_root.path().join(format!("check-{}", token.0));
                let sandbox_ctx = self.sandbox_context_for(&token);
                let state = HostState {
                    workspace: Arc::clone(&self.workspace),
                    config: Arc::clone(&self.config),
                    findings: Arc::clone(&findings),
                    scm: Arc::clone(&self.scm),
                    sandbox: Arc::clone(&self.sandbox),
                    sandbox_ctx: Arc::new(sandbox_ctx),
                    check_name: check.name.clone(),
                    check_token: token,
                    is_formatter: check.formatter,
                    scratch_dir,
                    var_values: Arc::clone(&var_values),
                };
                let check_name = check.name.clone();

                match catch_unwind(AssertUnwindSafe(|| run_one_check(check, state))) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        record_check_failure(&findings, &check_name, &err.to_string());
                        failed.lock().expect("failed-list lock poisoned").push(check_name);
                    }
                    Err(panic) => {
                        let message = CheckError::Panicked {
                            check: check_name.clone(),
                            message: panic_message(panic),
                        };
                        record_check_failure(&findings, &check_name, &message.to_string());
                        failed.lock().expect("failed-list lock poisoned").push(check_name);
                    }
                }
            });
        });
        let _ = options;

        let failed = failed.into_inner().expect("failed-list lock poisoned");
        let findings = Arc::try_unwrap(findings)
            .unwrap_or_else(|_| panic!("finding store still shared after phase 2 completed"));
        Ok((findings, failed))
    }

    fn sandbox_context_for(&self, token: &CheckToken) -> SandboxContext {
        let mut paths =
            vec![PathAccess { path: self.workspace.root().to_path_buf(), writable: self.config.writable_root }];
        for entry in &self.config.passthrough_env {
            if entry.is_path {
                paths.push(PathAccess { path: PathBuf::from(&entry.name), writable: entry.writable });
            }
        }
        SandboxContext {
            id: format!("check-{}", token.0),
            workspace_root: self.workspace.root().to_path_buf(),
            paths,
            resource_limits: ResourceLimits::default(),
            network_enabled: self.config.allow_network,
        }
    }
}

fn check_token_for(name: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    }
}

fn record_check_failure(findings: &FindingStore, check_name: &str, message: &str) {
    findings.push(Finding {
        check_name: check_name.to_string(),
        level: Level::Error,
        message: Some(message.to_string()),
        filepath: None,
        line: None,
        col: None,
        end_line: None,
        end_col: None,
        replacements: Vec::new(),
    });
}

/// Invoke one check's Starlark callable with a fresh `ctx` as its sole
/// positional argument, forwarding any `with_args(**kw)` bound kwargs as
/// named arguments (spec §9 open question: `with_args` forwards to the
/// callable at invocation time, alongside `ctx`).
fn run_one_check(check: &CheckDef, state: HostState) -> Result<(), ShacError> {
    std::fs::create_dir_all(&state.scratch_dir).map_err(|e| crate::error::IoError::WriteFailed {
        path: state.scratch_dir.clone(),
        message: e.to_string(),
    })?;

    let module = Module::new();
    let mut eval = Evaluator::new(&module);
    let heap = module.heap();
    let ctx_value = heap.alloc_complex_no_freeze(CtxValue { state: state.clone() });

    let callable = check.callable.to_value();
    let bound: Vec<(&str, starlark::values::Value)> =
        check.bound_kwargs.iter().map(|(k, v)| (k.as_str(), v.to_value())).collect();

    let result = eval.eval_function(callable, &[ctx_value], &bound);
    let _ = std::fs::remove_dir_all(&state.scratch_dir);

    match result {
        Ok(_) => Ok(()),
        Err(err) => Err(ShacError::Check(CheckError::Fail {
            check: state.check_name.clone(),
            message: err.to_string(),
        })),
    }
}

/// Walk the workspace for files whose basename matches `basename`, skipping
/// `config.is_ignored` paths — the same `ignore::WalkBuilder` idiom the
/// teacher's `discovery.rs` `walk_files` uses, sorted for run-to-run
/// determinism. Without recursion, only the root-level entry point exists.
fn discover_entry_points(
    root: &Path,
    basename: &str,
    recurse: bool,
    config: &Config,
) -> Result<Vec<PathBuf>, ShacError> {
    if !recurse {
        let candidate = root.join(basename);
        return Ok(if candidate.is_file() { vec![candidate] } else { Vec::new() });
    }

    let mut found = Vec::new();
    for entry in WalkBuilder::new(root).git_ignore(true).build().flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.file_name().map(|n| n == basename).unwrap_or(false) {
            if let Ok(rel) = path.strip_prefix(root) {
                let rel_str = rel.to_string_lossy().replace('\\', "/");
                if config.is_ignored(&rel_str) {
                    continue;
                }
            }
            found.push(path.to_path_buf());
        }
    }
    found.sort();
    Ok(found)
}

/// Recursively resolve, parse, evaluate, and freeze `canonical`, caching the
/// result in `loader`. Dependencies reached through `load()` statements are
/// loaded lazily by `EngineFileLoader::load` while this module's body is
/// being evaluated, each one recursing back into this same function.
fn load_module_recursive(
    loader: &ModuleLoader,
    globals: &Globals,
    canonical: &CanonicalPath,
) -> Result<(), ShacError> {
    if loader.get_cached(canonical).is_some() {
        return Ok(());
    }
    loader.enter(canonical)?;
    let result = (|| -> Result<(), ShacError> {
        let source_path = loader.source_path(canonical);
        let content = std::fs::read_to_string(&source_path)
            .map_err(|e| LoadError::ParseOrEval { module: canonical.clone(), message: e.to_string() })?;
        let ast = AstModule::parse(&source_path.to_string_lossy(), content, &Dialect::Standard)
            .map_err(|e| LoadError::ParseOrEval { module: canonical.clone(), message: e.to_string() })?;

        let module = Module::new();
        module.set_extra_value(module.heap().alloc(RegistrationList::new()));
        let file_loader = EngineFileLoader { loader, globals, calling_module: canonical.clone() };
        let mut eval = Evaluator::new(&module);
        eval.set_loader(&file_loader);
        eval.eval_module(ast, globals)
            .map_err(|e| LoadError::Fail { module: canonical.clone(), message: e.to_string() })?;

        let frozen = module
            .freeze()
            .map_err(|e| LoadError::ParseOrEval { module: canonical.clone(), message: e.to_string() })?;
        loader.insert_cached(canonical.clone(), frozen);
        Ok(())
    })();
    loader.leave(canonical);
    result
}

/// Bridges a module's `load()` statements to `load_module_recursive`,
/// evaluating each dependency on demand the first time it's referenced and
/// serving the cache thereafter.
struct EngineFileLoader<'a> {
    loader: &'a ModuleLoader,
    globals: &'a Globals,
    calling_module: CanonicalPath,
}

impl<'a> FileLoader for EngineFileLoader<'a> {
    fn load(&self, path: &str) -> anyhow::Result<starlark::environment::FrozenModule> {
        let canonical = self.loader.resolve_from(&self.calling_module, path)?;
        load_module_recursive(self.loader, self.globals, &canonical)?;
        self.loader
            .get_cached(&canonical)
            .ok_or_else(|| LoadError::Unresolved(canonical).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_mode_selects_expected_formatter_filter() {
        assert_eq!(RunMode::Check.formatter_filter(), FormatterFilter::All);
        assert_eq!(RunMode::Fmt.formatter_filter(), FormatterFilter::OnlyFormatters);
        assert_eq!(RunMode::Fix.formatter_filter(), FormatterFilter::ExcludeFormatters);
    }

    #[test]
    fn only_fmt_and_fix_apply_a_fix_plan() {
        assert!(!RunMode::Check.applies_fix());
        assert!(RunMode::Fmt.applies_fix());
        assert!(RunMode::Fix.applies_fix());
    }

    #[test]
    fn outcome_exit_code_is_zero_when_clean() {
        let outcome = EngineOutcome::default();
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn outcome_exit_code_is_one_on_error_finding() {
        let mut outcome = EngineOutcome::default();
        outcome.findings.push(Finding {
            check_name: "c".into(),
            level: Level::Error,
            message: Some("m".into()),
            filepath: None,
            line: None,
            col: None,
            end_line: None,
            end_col: None,
            replacements: vec![],
        });
        assert_eq!(outcome.exit_code(), 1);
    }

    #[test]
    fn discover_entry_points_without_recurse_only_finds_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shac.star"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("shac.star"), "").unwrap();
        let config = Config::defaults();
        let found = discover_entry_points(dir.path(), "shac.star", false, &config).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn discover_entry_points_recurses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shac.star"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("shac.star"), "").unwrap();
        let config = Config::defaults();
        let found = discover_entry_points(dir.path(), "shac.star", true, &config).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0] < found[1]);
    }
}
