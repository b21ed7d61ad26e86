//! Host API surface (spec §4.D): the `ctx.*` and `shac.*` globals.
//!
//! Grounded on the `#[starlark_value]`/`#[starlark_module]`/`GlobalsBuilder`
//! idiom shown in the sps2 build-context example
//! (`examples/other_examples/...sps2...starlark-context.rs.rs`): every
//! namespace (`ctx.emit`, `ctx.io`, `ctx.os`, ...) is a small
//! `StarlarkValue` struct holding shared, cheaply-cloned handles
//! (`Arc<FindingStore>`, `Arc<Workspace>`, ...), with callable operations
//! registered as methods on that type. `ctx` itself is never a global — it
//! is constructed fresh per check by the engine (phase 2) and passed as the
//! sole argument to the check's Starlark callable, per spec §4.F/§9's "`ctx`
//! pinned to that check's identity" instruction.

pub mod ctx;
pub mod emit;
pub mod io;
pub mod os_exec;
pub mod platform;
pub mod re;
pub mod scm;
pub mod shac_global;
pub mod vars;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::findings::FindingStore;
use crate::sandbox::{Sandbox, SandboxContext};
use crate::scm::ScmProbe;
use crate::workspace::Workspace;

/// Identifies the check currently executing on a given Starlark evaluator,
/// so host callbacks can resolve "which check is emitting" without the
/// user's check body ever seeing or threading it explicitly (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckToken(pub u64);

/// Everything a `ctx` and its sub-namespaces need, shared via `Arc` clones
/// rather than threaded through every method signature.
#[derive(Clone)]
pub struct HostState {
    pub workspace: Arc<Workspace>,
    pub config: Arc<Config>,
    pub findings: Arc<FindingStore>,
    pub scm: Arc<dyn ScmProbe>,
    pub sandbox: Arc<dyn Sandbox>,
    pub sandbox_ctx: Arc<SandboxContext>,
    pub check_name: String,
    pub check_token: CheckToken,
    pub is_formatter: bool,
    pub scratch_dir: std::path::PathBuf,
    pub var_values: Arc<BTreeMap<String, String>>,
}

/// A structural description of one object's methods/attributes, used by
/// `doc_model()` below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDoc {
    pub name: String,
    pub methods: Vec<String>,
    pub attributes: Vec<String>,
}

fn strs(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// The field set of the live `ctx`/`shac` surface. Each namespace's
/// `methods`/`attributes` here are built from the exact `pub(crate)`
/// `ATTRS`/`METHODS` constants that namespace's own `has_attr`/`get_attr`
/// (for attributes) or `#[starlark_module]` registration (for methods)
/// live next to — one name list per namespace, not a second one
/// independently maintained here (spec §8 property 9, §2 ambient
/// supplement, and testable property 12 in SPEC_FULL.md).
pub fn doc_model() -> Vec<ObjectDoc> {
    vec![
        ObjectDoc {
            name: "shac".to_string(),
            methods: strs(shac_global::SHAC_METHODS),
            attributes: strs(shac_global::SHAC_ATTRS),
        },
        ObjectDoc {
            name: "shac.CheckRef".to_string(),
            methods: strs(shac_global::CHECK_REF_METHODS),
            attributes: strs(shac_global::CHECK_REF_ATTRS),
        },
        ObjectDoc {
            name: "ctx".to_string(),
            methods: vec![],
            attributes: strs(ctx::ATTRS),
        },
        ObjectDoc {
            name: "ctx.emit".to_string(),
            methods: strs(emit::METHODS),
            attributes: vec![],
        },
        ObjectDoc {
            name: "ctx.io".to_string(),
            methods: strs(io::METHODS),
            attributes: vec![],
        },
        ObjectDoc {
            name: "ctx.os".to_string(),
            methods: strs(os_exec::METHODS),
            attributes: vec![],
        },
        ObjectDoc {
            name: "ctx.platform".to_string(),
            methods: vec![],
            attributes: strs(platform::ATTRS),
        },
        ObjectDoc {
            name: "ctx.re".to_string(),
            methods: strs(re::METHODS),
            attributes: vec![],
        },
        ObjectDoc {
            name: "ctx.scm".to_string(),
            methods: strs(scm::METHODS),
            attributes: strs(scm::ATTRS),
        },
        ObjectDoc {
            name: "ctx.vars".to_string(),
            methods: strs(vars::METHODS),
            attributes: vec![],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_model_covers_every_spec_object() {
        let names: Vec<_> = doc_model().into_iter().map(|d| d.name).collect();
        for expected in [
            "shac",
            "shac.CheckRef",
            "ctx",
            "ctx.emit",
            "ctx.io",
            "ctx.os",
            "ctx.platform",
            "ctx.re",
            "ctx.scm",
            "ctx.vars",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    /// Attribute parity isn't just asserted against the doc model's own
    /// source constants (tautological, since it's built from them) — it's
    /// cross-checked against each namespace's live `has_attr`, the method
    /// `StarlarkValue` dispatch actually calls on `ctx.<attr>`/`shac.<attr>`
    /// lookups. A name added to `doc_model()` without a matching `has_attr`
    /// branch (or vice versa) fails here.
    #[test]
    fn doc_model_attributes_match_live_has_attr() {
        use starlark::values::StarlarkValue;

        let module = starlark::environment::Module::new();
        let heap = module.heap();
        let platform = crate::hostapi::platform::PlatformValue;
        let shac = crate::hostapi::shac_global::ShacGlobalValue {
            version: "0".to_string(),
            commit_hash: "unknown".to_string(),
            gate: crate::hostapi::shac_global::PhaseGate::new(),
        };

        let platform_doc =
            doc_model().into_iter().find(|d| d.name == "ctx.platform").expect("ctx.platform in doc model");
        for attr in &platform_doc.attributes {
            assert!(platform.has_attr(attr, heap), "ctx.platform: has_attr false for {attr}");
        }
        assert!(!platform.has_attr("__not_a_real_attribute__", heap));

        let shac_doc = doc_model().into_iter().find(|d| d.name == "shac").expect("shac in doc model");
        for attr in &shac_doc.attributes {
            assert!(shac.has_attr(attr, heap), "shac: has_attr false for {attr}");
        }
        assert!(!shac.has_attr("__not_a_real_attribute__", heap));
    }
}
