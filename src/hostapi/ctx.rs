//! `ctx`: the per-check object passed as the sole argument to a check's
//! Starlark callable. Exposes `emit`, `io`, `os`, `platform`, `re`, `scm`,
//! `vars` as attributes, each a small `StarlarkValue` wrapping the shared
//! `HostState`.

use allocative::Allocative;
use starlark::values::{AllocValue, Heap, ProvidesStaticType, StarlarkValue, Trace, Value};
use starlark_derive::{starlark_value, NoSerialize};

use super::emit::EmitValue;
use super::io::IoValue;
use super::os_exec::OsValue;
use super::platform::PlatformValue;
use super::re::ReValue;
use super::scm::ScmNamespaceValue;
use super::vars::VarsValue;
use super::HostState;

#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct CtxValue {
    #[allocative(skip)]
    pub state: HostState,
}

impl std::fmt::Display for CtxValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx(check={})", self.state.check_name)
    }
}

unsafe impl<'v> Trace<'v> for CtxValue {
    fn trace(&mut self, _tracer: &starlark::values::Tracer<'v>) {}
}

impl<'v> AllocValue<'v> for CtxValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex_no_freeze(self)
    }
}

pub(crate) const ATTRS: &[&str] = &["emit", "io", "os", "platform", "re", "scm", "vars"];

#[starlark_value(type = "ctx")]
impl<'v> StarlarkValue<'v> for CtxValue {
    fn has_attr(&self, attribute: &str, _heap: &'v Heap) -> bool {
        ATTRS.contains(&attribute)
    }

    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        let state = self.state.clone();
        match attribute {
            "emit" => Some(heap.alloc_complex_no_freeze(EmitValue { state })),
            "io" => Some(heap.alloc_complex_no_freeze(IoValue { state })),
            "os" => Some(heap.alloc_complex_no_freeze(OsValue { state })),
            "platform" => Some(heap.alloc(PlatformValue)),
            "re" => Some(heap.alloc_complex_no_freeze(ReValue { state })),
            "scm" => Some(heap.alloc_complex_no_freeze(ScmNamespaceValue { state })),
            "vars" => Some(heap.alloc_complex_no_freeze(VarsValue { state })),
            _ => None,
        }
    }
}
