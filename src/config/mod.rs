//! Project configuration (spec §3 `Config`, §4.J Config loader).
//!
//! The project config file is a text-proto at the workspace root (default
//! `shac.textproto`). Unlike this crate's ironlayer-engine ancestor, which
//! resolved a 4-level TOML/YAML/pyproject cascade, shac's config shape and
//! format are both fixed by the spec, so there is exactly one file and one
//! schema — see `textproto` for the parser.

mod textproto;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{ConfigError, ShacError};

pub const DEFAULT_CONFIG_BASENAME: &str = "shac.textproto";
pub const DEFAULT_ENTRYPOINT_BASENAME: &str = "shac.star";

/// A declared runtime variable (`ctx.vars.get`/`--var`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDecl {
    pub description: String,
    pub default: Option<String>,
}

/// One `passthrough_env` entry (spec §3, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughEnvEntry {
    pub name: String,
    pub is_path: bool,
    pub writable: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub min_shac_version: (u32, u32, u32),
    pub allow_network: bool,
    pub writable_root: bool,
    pub ignore: Vec<String>,
    pub vars: BTreeMap<String, VarDecl>,
    pub passthrough_env: Vec<PassthroughEnvEntry>,
    pub aliases: BTreeMap<String, String>,
    ignore_globset: GlobSet,
}

impl Config {
    /// Built-in defaults, used when no config file exists at all (a bare
    /// workspace with only an entry point is still a valid workspace).
    pub fn defaults() -> Self {
        Self {
            min_shac_version: (0, 0, 0),
            allow_network: false,
            writable_root: false,
            ignore: Vec::new(),
            vars: BTreeMap::new(),
            passthrough_env: Vec::new(),
            aliases: BTreeMap::new(),
            ignore_globset: GlobSetBuilder::new().build().expect("empty globset"),
        }
    }

    /// Whether a workspace-relative path matches one of the `ignore`
    /// patterns, and so is invisible to `affected_files()`/`all_files()`.
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        if self.ignore_globset.is_match(rel_path) {
            return true;
        }
        self.ignore.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            rel_path == prefix || rel_path.starts_with(&format!("{prefix}/"))
        })
    }

    fn compile_ignore(ignore: &[String]) -> Result<GlobSet, ShacError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in ignore {
            let glob = Glob::new(pattern).map_err(|e| {
                ConfigError::Invalid {
                    path: PathBuf::new(),
                    message: format!("bad ignore glob {pattern:?}: {e}"),
                }
            })?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| ConfigError::Invalid { path: PathBuf::new(), message: e.to_string() }.into())
    }
}

/// Current binary's own version, used to enforce `min_shac_version`.
pub fn running_version() -> (u32, u32, u32) {
    let raw = env!("CARGO_PKG_VERSION");
    let mut parts = raw.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate the project config at `path`. Unknown fields and
    /// duplicate keys are hard errors (spec §4.J); so is a `min_shac_version`
    /// the running binary does not satisfy.
    pub fn load(path: &Path) -> Result<Config, ShacError> {
        if !path.is_file() {
            return Ok(Config::defaults());
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let doc = textproto::parse(&text).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: e,
        })?;

        let mut vars = BTreeMap::new();
        for (name, var) in doc.vars {
            vars.insert(name, VarDecl { description: var.description, default: var.default });
        }

        let mut passthrough_env = Vec::new();
        for entry in doc.passthrough_env {
            passthrough_env.push(PassthroughEnvEntry {
                name: entry.name,
                is_path: entry.is_path,
                writable: entry.writable,
            });
        }

        let ignore_globset = Config::compile_ignore(&doc.ignore).map_err(|e| match e {
            ShacError::Config(ConfigError::Invalid { message, .. }) => {
                ConfigError::Invalid { path: path.to_path_buf(), message }
            }
            other => ConfigError::Invalid { path: path.to_path_buf(), message: other.to_string() },
        })?;

        let config = Config {
            min_shac_version: doc.min_shac_version.unwrap_or((0, 0, 0)),
            allow_network: doc.allow_network,
            writable_root: doc.writable_root,
            ignore: doc.ignore,
            vars,
            passthrough_env,
            aliases: doc.aliases,
            ignore_globset,
        };

        let running = running_version();
        if config.min_shac_version > running {
            return Err(ConfigError::MinVersion {
                required: format!(
                    "{}.{}.{}",
                    config.min_shac_version.0, config.min_shac_version.1, config.min_shac_version.2
                ),
                actual: format!("{}.{}.{}", running.0, running.1, running.2),
            }
            .into());
        }

        Ok(config)
    }

    /// Resolve `@alias` / `@alias//path` against `config.aliases`.
    pub fn resolve_alias<'a>(config: &'a Config, alias: &str) -> Result<&'a str, ShacError> {
        config
            .aliases
            .get(alias)
            .map(|s| s.as_str())
            .ok_or_else(|| ConfigError::UnknownAlias(alias.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive_enough_to_run() {
        let c = Config::defaults();
        assert!(!c.allow_network);
        assert!(!c.is_ignored("anything"));
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::load(&dir.path().join("shac.textproto")).unwrap();
        assert_eq!(config.min_shac_version, (0, 0, 0));
    }

    #[test]
    fn rejects_version_above_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shac.textproto");
        std::fs::write(&path, "min_shac_version: \"999.0.0\"\n").unwrap();
        let err = ConfigLoader::load(&path).unwrap_err();
        assert!(matches!(err, ShacError::Config(ConfigError::MinVersion { .. })));
    }
}
