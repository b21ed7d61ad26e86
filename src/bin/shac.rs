//! `shac` CLI driver (spec §6): subcommand dispatch over the `shac` library.
//!
//! Grounded on the `clap::Parser`/`Subcommand` idiom shown in the pack's
//! `xchecker` CLI (`EffortlessMetrics-xchecker-dev/src/cli.rs`) — the
//! teacher itself has no CLI binary, only a PyO3-importable library, so
//! this is an ambient addition per `SPEC_FULL.md` §6. Subcommand bodies stay
//! thin: argument parsing and wiring only; all engine/config/reporter logic
//! lives in the library.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use shac::config::{Config, ConfigLoader, DEFAULT_CONFIG_BASENAME, DEFAULT_ENTRYPOINT_BASENAME};
use shac::engine::{Engine, RunMode, RunOptions};
use shac::error::{ShacError, UsageError};
use shac::hostapi::doc_model;
use shac::reporter::sarif::SarifReporter;
use shac::reporter::terminal::TerminalReporter;
use shac::reporter::{Reporter, RunSummary};
use shac::workspace::Workspace;

#[derive(Parser)]
#[command(name = "shac", about = "Scalable Hermetic Analysis and Checks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Run from this directory instead of the current one.
    #[arg(short = 'C', long, global = true)]
    cwd: Option<PathBuf>,

    /// Run over every tracked file instead of only affected ones.
    #[arg(long, global = true)]
    all: bool,

    /// Load only the root entry point; skip recursive discovery.
    #[arg(long, global = true)]
    no_recurse: bool,

    /// Entry point basename to look for (default `shac.star`).
    #[arg(long, global = true)]
    entrypoint: Option<String>,

    /// Run only the named checks (comma-separated, repeatable).
    #[arg(long, value_delimiter = ',', global = true)]
    only: Vec<String>,

    /// Skip the named checks (comma-separated, repeatable).
    #[arg(long, value_delimiter = ',', global = true)]
    skip: Vec<String>,

    /// Declare a runtime variable, `key=value`, repeatable.
    #[arg(long = "var", global = true)]
    vars: Vec<String>,

    /// Verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Positional file arguments (mutually exclusive with `--all`).
    files: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run all registered checks.
    Check {
        /// Write SARIF output to this path.
        #[arg(long)]
        json_output: Option<PathBuf>,
    },
    /// Run formatter checks and apply their replacements to disk.
    Fmt {
        /// Suppress non-error output.
        #[arg(long)]
        quiet: bool,
    },
    /// Run non-formatter checks and apply resolved replacements to disk.
    Fix,
    /// Print Markdown docs for a Starlark module (default: the stdlib).
    Doc {
        /// A module path, or "stdlib" (the default) for the host API surface.
        module: Option<String>,
    },
    /// Print the shac version.
    Version,
    /// Print top-level usage.
    Help,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("shac: {}: {err}", err.category());
            match err {
                ShacError::Usage(_) => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, ShacError> {
    let Some(command) = cli.command else {
        print_help();
        return Err(UsageError::NoSubcommand.into());
    };

    if cli.all && !cli.files.is_empty() {
        return Err(UsageError::AllAndFiles.into());
    }

    if let Command::Doc { module } = &command {
        print_doc(module.as_deref());
        return Ok(ExitCode::SUCCESS);
    }
    if let Command::Version = &command {
        println!("shac v{}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }
    if let Command::Help = &command {
        print_help();
        return Ok(ExitCode::SUCCESS);
    }

    let root = resolve_root(cli.cwd.as_deref())?;
    let config_path = root.join(DEFAULT_CONFIG_BASENAME);
    let config = ConfigLoader::load(&config_path)?;
    let var_values = parse_vars(&cli.vars, &config)?;

    let entrypoint = cli.entrypoint.clone().unwrap_or_else(|| DEFAULT_ENTRYPOINT_BASENAME.to_string());
    let workspace = Workspace::new(root);
    let file_prefixes: Vec<String> =
        cli.files.iter().map(|p| p.to_string_lossy().replace('\\', "/")).collect();
    let engine = Engine::with_files(workspace, config, cli.all, file_prefixes);

    let (mode, json_output, quiet) = match &command {
        Command::Check { json_output } => (RunMode::Check, json_output.clone(), false),
        Command::Fmt { quiet } => (RunMode::Fmt, None, *quiet),
        Command::Fix => (RunMode::Fix, None, false),
        Command::Doc { .. } | Command::Version | Command::Help => unreachable!("handled above"),
    };

    let options = RunOptions {
        mode,
        entrypoint_basename: entrypoint,
        recurse: !cli.no_recurse,
        only: if cli.only.is_empty() { None } else { Some(cli.only.clone()) },
        skip: cli.skip.clone(),
        var_values,
    };

    let outcome = engine.run(&options)?;

    let summary = RunSummary { checks_run: 0, checks_failed: outcome.checks_failed.clone() };

    if let Some(json_path) = json_output {
        let mut reporter = SarifReporter::new();
        for finding in &outcome.findings {
            reporter.on_finding(finding);
        }
        reporter.finish(&outcome.findings, &summary)?;
        let json = reporter.to_json()?;
        std::fs::write(&json_path, json).map_err(|e| shac::error::IoError::WriteFailed {
            path: json_path,
            message: e.to_string(),
        })?;
    }

    if !quiet {
        let mut reporter = TerminalReporter::stdout();
        for finding in &outcome.findings {
            reporter.on_finding(finding);
        }
        for artifact in &outcome.artifacts {
            reporter.on_artifact(artifact);
        }
        reporter.finish(&outcome.findings, &summary)?;
    }

    let exit = outcome.exit_code();
    Ok(if exit == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn resolve_root(cwd: Option<&Path>) -> Result<PathBuf, ShacError> {
    let dir = match cwd {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir().map_err(|e| shac::error::IoError::WriteFailed {
            path: PathBuf::from("."),
            message: e.to_string(),
        })?,
    };
    dir.canonicalize().map_err(|_| shac::error::IoError::NotFound(dir).into())
}

/// Parse repeated `--var key=value` flags, rejecting names not declared in
/// `config.vars` up front rather than deferring to the first `ctx.vars.get`
/// call inside a check (spec §3: "only names here may be queried").
fn parse_vars(raw: &[String], config: &Config) -> Result<std::collections::BTreeMap<String, String>, ShacError> {
    let mut out = std::collections::BTreeMap::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(UsageError::BadArgument(format!("--var {entry:?} is not key=value")).into());
        };
        if !config.vars.contains_key(key) {
            return Err(UsageError::BadArgument(format!("--var {key:?} is not declared in config")).into());
        }
        out.insert(key.to_string(), value.to_string());
    }
    out
}

fn print_help() {
    println!(
        "usage: shac <check|fmt|fix|doc|version> [options] [files...]\n\n\
         Run `shac help` or pass -h to a subcommand for details."
    );
}

/// Render `hostapi::doc_model()` as Markdown. Lives in the binary, not the
/// library, since spec.md §1 names the documentation extractor as an
/// external collaborator to the core.
fn print_doc(module: Option<&str>) {
    let target = module.unwrap_or("stdlib");
    println!("# shac: {target}\n");
    for object in doc_model() {
        println!("## `{}`", object.name);
        if !object.attributes.is_empty() {
            println!("\nAttributes:");
            for attr in &object.attributes {
                println!("- `{attr}`");
            }
        }
        if !object.methods.is_empty() {
            println!("\nMethods:");
            for method in &object.methods {
                println!("- `{method}(...)`");
            }
        }
        println!();
    }
}
