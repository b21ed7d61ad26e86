//! `ctx.scm`: `root` attribute, `affected_files(include_deleted=False)` and
//! `all_files(include_deleted=False)` methods, delegating to the shared
//! `ScmProbe` in `HostState`.

use allocative::Allocative;
use starlark::environment::{Methods, MethodsBuilder, MethodsStatic};
use starlark::values::dict::Dict;
use starlark::values::{AllocValue, Heap, ProvidesStaticType, StarlarkValue, Trace, Value};
use starlark_derive::{starlark_module, starlark_value, NoSerialize};

use crate::types::{FileAction, FileMetaMap};

use super::HostState;

#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct ScmNamespaceValue {
    #[allocative(skip)]
    pub state: HostState,
}

impl std::fmt::Display for ScmNamespaceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx.scm(check={})", self.state.check_name)
    }
}

unsafe impl<'v> Trace<'v> for ScmNamespaceValue {
    fn trace(&mut self, _tracer: &starlark::values::Tracer<'v>) {}
}

impl<'v> AllocValue<'v> for ScmNamespaceValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex_no_freeze(self)
    }
}

pub(crate) const ATTRS: &[&str] = &["root"];

#[starlark_value(type = "ctx.scm")]
impl<'v> StarlarkValue<'v> for ScmNamespaceValue {
    fn has_attr(&self, attribute: &str, _heap: &'v Heap) -> bool {
        ATTRS.contains(&attribute)
    }

    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        match attribute {
            "root" => Some(heap.alloc(self.state.workspace.root().to_string_lossy().into_owned())),
            _ => None,
        }
    }

    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(scm_methods)
    }
}

fn file_meta_map_to_value<'v>(heap: &'v Heap, files: &FileMetaMap) -> Value<'v> {
    let entries = files.values().map(|meta| {
        let action = match meta.action {
            FileAction::Added => "added",
            FileAction::Modified => "modified",
            FileAction::Deleted => "deleted",
        };
        let new_lines: Vec<Value<'v>> = meta
            .new_lines
            .iter()
            .map(|(n, line)| {
                let pair: Vec<Value<'v>> = vec![heap.alloc(*n as i32), heap.alloc(line.as_str())];
                heap.alloc(pair)
            })
            .collect();
        let record = Dict::new(
            [
                (heap.alloc_str("action").to_value(), heap.alloc(action)),
                (heap.alloc_str("new_lines").to_value(), heap.alloc(new_lines)),
            ]
            .into_iter()
            .collect(),
        );
        (heap.alloc_str(&meta.path).to_value(), heap.alloc(record))
    });
    heap.alloc(Dict::new(entries.collect()))
}

pub(crate) const METHODS: &[&str] = &["affected_files", "all_files"];

#[starlark_module]
fn scm_methods(builder: &mut MethodsBuilder) {
    fn affected_files<'v>(
        this: &ScmNamespaceValue,
        heap: &'v Heap,
        include_deleted: Option<bool>,
    ) -> anyhow::Result<Value<'v>> {
        let files = this
            .state
            .scm
            .affected_files(include_deleted.unwrap_or(false))
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(file_meta_map_to_value(heap, &files))
    }

    fn all_files<'v>(
        this: &ScmNamespaceValue,
        heap: &'v Heap,
        include_deleted: Option<bool>,
    ) -> anyhow::Result<Value<'v>> {
        let files = this
            .state
            .scm
            .all_files(include_deleted.unwrap_or(false))
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(file_meta_map_to_value(heap, &files))
    }
}
