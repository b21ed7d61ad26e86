//! `ctx.io.read_file(...)`, `ctx.io.tempdir()`, `ctx.io.tempfile(...)`.

use allocative::Allocative;
use starlark::environment::{Methods, MethodsBuilder, MethodsStatic};
use starlark::values::{AllocValue, Heap, ProvidesStaticType, StarlarkValue, Trace, Value};
use starlark_derive::{starlark_module, starlark_value, NoSerialize};

use crate::types::MAX_STREAM_BYTES;

use super::HostState;

#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct IoValue {
    #[allocative(skip)]
    pub state: HostState,
}

impl std::fmt::Display for IoValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx.io(check={})", self.state.check_name)
    }
}

unsafe impl<'v> Trace<'v> for IoValue {
    fn trace(&mut self, _tracer: &starlark::values::Tracer<'v>) {}
}

impl<'v> AllocValue<'v> for IoValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex_no_freeze(self)
    }
}

#[starlark_value(type = "ctx.io")]
impl<'v> StarlarkValue<'v> for IoValue {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(io_methods)
    }
}

/// Default per-build truncation bound used when `size` is not given.
const DEFAULT_READ_SIZE: usize = 8 * 1024 * 1024;

pub(crate) const METHODS: &[&str] = &["read_file", "tempdir", "tempfile"];

#[starlark_module]
fn io_methods(builder: &mut MethodsBuilder) {
    fn read_file<'v>(this: &IoValue, filepath: &str, size: Option<i32>) -> anyhow::Result<String> {
        let abs = this.state.workspace.resolve(filepath).map_err(|e| anyhow::anyhow!("{e}"))?;
        let bound = size
            .map(|s| (s.max(0) as usize).min(MAX_STREAM_BYTES))
            .unwrap_or(DEFAULT_READ_SIZE);
        let bytes = std::fs::read(&abs).map_err(|e| anyhow::anyhow!("{e}"))?;
        let truncated = &bytes[..bytes.len().min(bound)];
        Ok(String::from_utf8_lossy(truncated).into_owned())
    }

    fn tempdir<'v>(this: &IoValue) -> anyhow::Result<String> {
        let dir = this.state.scratch_dir.join(format!("td-{}", unique_suffix()));
        std::fs::create_dir_all(&dir)?;
        Ok(dir.to_string_lossy().into_owned())
    }

    fn tempfile<'v>(this: &IoValue, content: &str, name: Option<&str>) -> anyhow::Result<String> {
        std::fs::create_dir_all(&this.state.scratch_dir)?;
        let filename = name
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("tf-{}", unique_suffix()));
        let path = this.state.scratch_dir.join(filename);
        std::fs::write(&path, content)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

fn unique_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}
