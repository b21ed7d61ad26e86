//! `ctx.emit.finding(...)` / `ctx.emit.artifact(...)`.

use allocative::Allocative;
use starlark::environment::{Methods, MethodsBuilder, MethodsStatic};
use starlark::values::none::NoneType;
use starlark::values::{AllocValue, Heap, ProvidesStaticType, StarlarkValue, Trace, Value};
use starlark_derive::{starlark_module, starlark_value, NoSerialize};

use crate::types::{Artifact, Finding, Level};

use super::HostState;

#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct EmitValue {
    #[allocative(skip)]
    pub state: HostState,
}

impl std::fmt::Display for EmitValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx.emit(check={})", self.state.check_name)
    }
}

unsafe impl<'v> Trace<'v> for EmitValue {
    fn trace(&mut self, _tracer: &starlark::values::Tracer<'v>) {}
}

impl<'v> AllocValue<'v> for EmitValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex_no_freeze(self)
    }
}

#[starlark_value(type = "ctx.emit")]
impl<'v> StarlarkValue<'v> for EmitValue {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(emit_methods)
    }
}

fn parse_level(raw: &str) -> anyhow::Result<Level> {
    match raw {
        "notice" => Ok(Level::Notice),
        "warning" => Ok(Level::Warning),
        "error" => Ok(Level::Error),
        other => Err(anyhow::anyhow!("invalid level {other:?}; expected notice/warning/error")),
    }
}

pub(crate) const METHODS: &[&str] = &["finding", "artifact"];

#[starlark_module]
#[allow(clippy::too_many_arguments)]
fn emit_methods(builder: &mut MethodsBuilder) {
    fn finding<'v>(
        this: &EmitValue,
        level: &str,
        message: Option<&str>,
        filepath: Option<&str>,
        line: Option<u32>,
        col: Option<u32>,
        end_line: Option<u32>,
        end_col: Option<u32>,
        replacements: Option<Vec<String>>,
    ) -> anyhow::Result<NoneType> {
        let level = parse_level(level)?;
        let finding = Finding {
            check_name: this.state.check_name.clone(),
            level,
            message: message.map(|s| s.to_string()),
            filepath: filepath.map(|s| s.to_string()),
            line,
            col,
            end_line,
            end_col,
            replacements: replacements.unwrap_or_default(),
        };
        finding
            .validate(this.state.is_formatter)
            .map_err(|e| anyhow::anyhow!("invalid ctx.emit.finding arguments: {e}"))?;
        if let Some(ref filepath) = finding.filepath {
            this.state
                .workspace
                .resolve(filepath)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        this.state.findings.push(finding);
        Ok(NoneType)
    }

    fn artifact<'v>(this: &EmitValue, filepath: &str, content: Option<&str>) -> anyhow::Result<NoneType> {
        let bytes = match content {
            Some(c) => c.as_bytes().to_vec(),
            None => {
                let abs = this
                    .state
                    .workspace
                    .resolve(filepath)
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                std::fs::read(&abs).map_err(|e| anyhow::anyhow!("{e}"))?
            }
        };
        let artifact = Artifact {
            check_name: this.state.check_name.clone(),
            filepath: filepath.to_string(),
            content: bytes,
        };
        this.state.findings.push_artifact(artifact);
        Ok(NoneType)
    }
}
