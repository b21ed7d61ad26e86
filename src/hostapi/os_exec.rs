//! `ctx.os.exec(...)` — returns a handle whose `.wait()` runs the
//! subprocess under the configured sandbox and returns
//! `{retcode, stdout, stderr}`.

use std::cell::RefCell;
use std::collections::BTreeMap;

use allocative::Allocative;
use starlark::environment::{Methods, MethodsBuilder, MethodsStatic};
use starlark::values::{AllocValue, Heap, ProvidesStaticType, StarlarkValue, Trace, Value};
use starlark_derive::{starlark_module, starlark_value, NoSerialize};

use crate::error::CheckError;
use crate::types::SubprocessSpec;

use super::HostState;

#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct OsValue {
    #[allocative(skip)]
    pub state: HostState,
}

impl std::fmt::Display for OsValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx.os(check={})", self.state.check_name)
    }
}

unsafe impl<'v> Trace<'v> for OsValue {
    fn trace(&mut self, _tracer: &starlark::values::Tracer<'v>) {}
}

impl<'v> AllocValue<'v> for OsValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex_no_freeze(self)
    }
}

#[starlark_value(type = "ctx.os")]
impl<'v> StarlarkValue<'v> for OsValue {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(os_methods)
    }
}

/// A spawned subprocess handle. `.wait()` blocks the calling worker — this
/// is one of the cooperative cancellation points spec §5 describes.
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct SubprocessHandleValue {
    #[allocative(skip)]
    pub check_name: String,
    #[allocative(skip)]
    pub ok_retcodes: Option<Vec<i32>>,
    #[allocative(skip)]
    pub raise_on_failure: bool,
    #[allocative(skip)]
    pub inner: RefCell<Option<Box<dyn crate::sandbox::SandboxHandle>>>,
}

impl std::fmt::Display for SubprocessHandleValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SubprocessHandle(check={})", self.check_name)
    }
}

unsafe impl<'v> Trace<'v> for SubprocessHandleValue {
    fn trace(&mut self, _tracer: &starlark::values::Tracer<'v>) {}
}

impl<'v> AllocValue<'v> for SubprocessHandleValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex_no_freeze(self)
    }
}

#[starlark_value(type = "ctx.os.SubprocessHandle")]
impl<'v> StarlarkValue<'v> for SubprocessHandleValue {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(subprocess_handle_methods)
    }
}

#[starlark_module]
fn subprocess_handle_methods(builder: &mut MethodsBuilder) {
    fn wait<'v>(this: &SubprocessHandleValue, heap: &'v Heap) -> anyhow::Result<Value<'v>> {
        let handle = this
            .inner
            .borrow_mut()
            .take()
            .ok_or_else(|| anyhow::anyhow!("wait() already called on this handle"))?;
        let result = handle.wait().map_err(|e| anyhow::anyhow!("{e}"))?;

        let violates = match &this.ok_retcodes {
            Some(allowed) => !allowed.contains(&result.retcode),
            None => this.raise_on_failure && result.retcode != 0,
        };
        if violates {
            return Err(anyhow::Error::new(CheckError::SubprocessRetcode {
                check: this.check_name.clone(),
                retcode: result.retcode,
            }));
        }

        let dict = starlark::values::dict::Dict::new(
            [
                (heap.alloc_str("retcode").to_value(), heap.alloc(result.retcode)),
                (
                    heap.alloc_str("stdout").to_value(),
                    heap.alloc(String::from_utf8_lossy(&result.stdout).into_owned()),
                ),
                (
                    heap.alloc_str("stderr").to_value(),
                    heap.alloc(String::from_utf8_lossy(&result.stderr).into_owned()),
                ),
            ]
            .into_iter()
            .collect(),
        );
        Ok(heap.alloc(dict))
    }
}

/// Methods on the `ctx.os` namespace itself — not the `SubprocessHandle`
/// returned by `exec()`, which has its own `wait()` and isn't part of the
/// `ctx.os` doc model.
pub(crate) const METHODS: &[&str] = &["exec"];

#[starlark_module]
#[allow(clippy::too_many_arguments)]
fn os_methods(builder: &mut MethodsBuilder) {
    fn exec<'v>(
        this: &OsValue,
        heap: &'v Heap,
        cmd: Vec<String>,
        cwd: Option<&str>,
        env: Option<Value<'v>>,
        stdin: Option<&str>,
        allow_network: Option<bool>,
        ok_retcodes: Option<Vec<i32>>,
        raise_on_failure: Option<bool>,
    ) -> anyhow::Result<Value<'v>> {
        let allow_network = allow_network.unwrap_or(false);
        let raise_on_failure = raise_on_failure.unwrap_or(ok_retcodes.is_none());
        if ok_retcodes.is_some() && raise_on_failure {
            return Err(anyhow::anyhow!(
                "raise_on_failure and ok_retcodes are mutually exclusive"
            ));
        }

        let mut env_map = BTreeMap::new();
        if let Some(env_value) = env {
            if let Some(dict) = starlark::values::dict::DictRef::from_value(env_value) {
                for (k, v) in dict.iter() {
                    if let (Some(k), Some(v)) = (k.unpack_str(), v.unpack_str()) {
                        env_map.insert(k.to_string(), v.to_string());
                    }
                }
            }
        }

        let spec = SubprocessSpec {
            cmd,
            cwd: cwd.unwrap_or(".").to_string(),
            env: env_map,
            stdin: stdin.map(|s| s.as_bytes().to_vec()),
            allow_network,
            ok_retcodes: ok_retcodes.clone(),
            raise_on_failure,
        };
        spec.validate().map_err(|e| anyhow::anyhow!(e))?;

        let handle = this
            .state
            .sandbox
            .spawn(&spec, &this.state.sandbox_ctx)
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        Ok(heap.alloc_complex_no_freeze(SubprocessHandleValue {
            check_name: this.state.check_name.clone(),
            ok_retcodes,
            raise_on_failure,
            inner: RefCell::new(Some(handle)),
        }))
    }
}
