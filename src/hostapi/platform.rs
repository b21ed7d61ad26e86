//! `ctx.platform`: `os`/`arch` compile-time constants. Stateless and
//! immutable, so it is allocated directly (`heap.alloc(PlatformValue)`)
//! rather than via `alloc_complex_no_freeze` like the stateful namespaces.

use allocative::Allocative;
use starlark::values::{NoSerialize, ProvidesStaticType, StarlarkValue};
use starlark::starlark_simple_value;
use starlark_derive::starlark_value;

#[derive(Debug, Clone, Copy, ProvidesStaticType, NoSerialize, Allocative)]
pub struct PlatformValue;

starlark_simple_value!(PlatformValue);

impl std::fmt::Display for PlatformValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx.platform(os={}, arch={})", os_name(), arch_name())
    }
}

pub(crate) const ATTRS: &[&str] = &["os", "arch"];

#[starlark_value(type = "ctx.platform")]
impl<'v> StarlarkValue<'v> for PlatformValue {
    fn has_attr(&self, attribute: &str, _heap: &'v starlark::values::Heap) -> bool {
        ATTRS.contains(&attribute)
    }

    fn get_attr(&self, attribute: &str, heap: &'v starlark::values::Heap) -> Option<starlark::values::Value<'v>> {
        match attribute {
            "os" => Some(heap.alloc(os_name())),
            "arch" => Some(heap.alloc(arch_name())),
            _ => None,
        }
    }
}

/// Go-style OS taxonomy (`linux`/`darwin`/`windows`), matching the naming
/// `ctx.platform` scripts are expected to branch on (spec §3).
fn os_name() -> &'static str {
    if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        "other"
    }
}

fn arch_name() -> &'static str {
    if cfg!(target_arch = "x86_64") {
        "amd64"
    } else if cfg!(target_arch = "aarch64") {
        "arm64"
    } else {
        std::env::consts::ARCH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_name_is_one_of_the_known_values() {
        assert!(["linux", "darwin", "windows", "other"].contains(&os_name()));
    }

    #[test]
    fn arch_name_is_non_empty() {
        assert!(!arch_name().is_empty());
    }
}
