//! `ctx.vars.get(name)`: resolves a declared runtime variable to its
//! `--var` override or the config's declared default, failing for a name
//! never declared in the project config's `vars` block.

use allocative::Allocative;
use starlark::environment::{Methods, MethodsBuilder, MethodsStatic};
use starlark::values::{AllocValue, Heap, ProvidesStaticType, StarlarkValue, Trace, Value};
use starlark_derive::{starlark_module, starlark_value, NoSerialize};

use super::HostState;

#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct VarsValue {
    #[allocative(skip)]
    pub state: HostState,
}

impl std::fmt::Display for VarsValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx.vars(check={})", self.state.check_name)
    }
}

unsafe impl<'v> Trace<'v> for VarsValue {
    fn trace(&mut self, _tracer: &starlark::values::Tracer<'v>) {}
}

impl<'v> AllocValue<'v> for VarsValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex_no_freeze(self)
    }
}

#[starlark_value(type = "ctx.vars")]
impl<'v> StarlarkValue<'v> for VarsValue {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(vars_methods)
    }
}

pub(crate) const METHODS: &[&str] = &["get"];

#[starlark_module]
fn vars_methods(builder: &mut MethodsBuilder) {
    fn get<'v>(this: &VarsValue, heap: &'v Heap, name: &str) -> anyhow::Result<Value<'v>> {
        let Some(decl) = this.state.config.vars.get(name) else {
            return Err(anyhow::anyhow!("ctx.vars.get: {name:?} is not declared in this project's config"));
        };
        if let Some(value) = this.state.var_values.get(name) {
            return Ok(heap.alloc(value.as_str()));
        }
        match &decl.default {
            Some(default) => Ok(heap.alloc(default.as_str())),
            None => Err(anyhow::anyhow!(
                "ctx.vars.get: {name:?} has no default and was not supplied via --var"
            )),
        }
    }
}
