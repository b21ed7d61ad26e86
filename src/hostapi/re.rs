//! `ctx.re.match(pattern, s)` / `ctx.re.allmatches(pattern, s)`, backed by
//! the `regex` crate.

use allocative::Allocative;
use starlark::environment::{Methods, MethodsBuilder, MethodsStatic};
use starlark::values::dict::Dict;
use starlark::values::{AllocValue, Heap, ProvidesStaticType, StarlarkValue, Trace, Value};
use starlark_derive::{starlark_module, starlark_value, NoSerialize};

use super::HostState;

#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct ReValue {
    #[allocative(skip)]
    pub state: HostState,
}

impl std::fmt::Display for ReValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx.re(check={})", self.state.check_name)
    }
}

unsafe impl<'v> Trace<'v> for ReValue {
    fn trace(&mut self, _tracer: &starlark::values::Tracer<'v>) {}
}

impl<'v> AllocValue<'v> for ReValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex_no_freeze(self)
    }
}

#[starlark_value(type = "ctx.re")]
impl<'v> StarlarkValue<'v> for ReValue {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(re_methods)
    }
}

fn compile(pattern: &str) -> anyhow::Result<regex::Regex> {
    regex::Regex::new(pattern).map_err(|e| anyhow::anyhow!("invalid regex {pattern:?}: {e}"))
}

/// Build the `{offset, groups}` record for one match.
fn match_record<'v>(heap: &'v Heap, m: &regex::Captures) -> Value<'v> {
    let whole = m.get(0).expect("group 0 always present");
    let groups: Vec<Value<'v>> = m
        .iter()
        .skip(1)
        .map(|g| match g {
            Some(g) => heap.alloc(g.as_str()),
            None => Value::new_none(),
        })
        .collect();
    let dict = Dict::new(
        [
            (heap.alloc_str("offset").to_value(), heap.alloc(whole.start() as i32)),
            (heap.alloc_str("groups").to_value(), heap.alloc(groups)),
        ]
        .into_iter()
        .collect(),
    );
    heap.alloc(dict)
}

pub(crate) const METHODS: &[&str] = &["match", "allmatches"];

#[starlark_module]
fn re_methods(builder: &mut MethodsBuilder) {
    fn r#match<'v>(this: &ReValue, heap: &'v Heap, pattern: &str, s: &str) -> anyhow::Result<Value<'v>> {
        let _ = this;
        let re = compile(pattern)?;
        match re.captures(s) {
            Some(caps) => Ok(match_record(heap, &caps)),
            None => Ok(Value::new_none()),
        }
    }

    fn allmatches<'v>(this: &ReValue, heap: &'v Heap, pattern: &str, s: &str) -> anyhow::Result<Value<'v>> {
        let _ = this;
        let re = compile(pattern)?;
        let records: Vec<Value<'v>> = re.captures_iter(s).map(|caps| match_record(heap, &caps)).collect();
        Ok(heap.alloc(records))
    }
}
