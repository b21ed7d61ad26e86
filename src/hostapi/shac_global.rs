//! The `shac` global: `shac.check(...)`, `shac.register_check(...)`,
//! `shac.version`, `shac.commit_hash` (spec §4.D, §4.E).
//!
//! `shac.check()` only ever runs during phase 1 module evaluation, so its
//! result (`CheckRefValue`) and the registration side-list it feeds
//! (`RegistrationList`) are ordinary Starlark heap values that participate
//! in the module's freeze just like any other binding. The engine attaches
//! a fresh `RegistrationList` to each module via `Module::set_extra_value`
//! before evaluating it, then reads the frozen result back out via
//! `FrozenModule::extra_value()` once the module is frozen. `register_check`
//! enforces phase separation (testable property 2) with a shared
//! `Arc<AtomicBool>` "phase 1 closed" flag passed in through `ShacGlobalValue`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use allocative::Allocative;
use starlark::environment::{GlobalsBuilder, Methods, MethodsBuilder, MethodsStatic};
use starlark::values::{
    AllocValue, Freeze, Freezer, FrozenValue, Heap, NoSerialize, ProvidesStaticType, StarlarkValue,
    Trace, Value,
};
use starlark_derive::starlark_value;

use crate::error::{LoadError, ShacError};

/// Shared across every module evaluated in phase 1 of one engine run: once
/// closed, `shac.register_check` refuses to proceed.
#[derive(Clone, Default)]
pub struct PhaseGate {
    closed: Arc<AtomicBool>,
}

impl PhaseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A resolved registration, read back out of a frozen `RegistrationList`
/// after `Module::freeze()`. The engine turns each of these into a
/// `registry::CheckDef`.
#[derive(Debug, Clone)]
pub struct FrozenRegistration {
    pub name: String,
    pub formatter: bool,
    pub callable: FrozenValue,
    pub bound_kwargs: BTreeMap<String, FrozenValue>,
}

// ---------------------------------------------------------------------
// CheckRefValue: the return value of `shac.check(...)`, live (unfrozen) form.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct CheckRefValue<'v> {
    pub name: String,
    pub formatter: bool,
    pub callable: Value<'v>,
    pub bound_kwargs: BTreeMap<String, Value<'v>>,
}

impl std::fmt::Display for CheckRefValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CheckRef(name={:?}, formatter={})", self.name, self.formatter)
    }
}

unsafe impl<'v> Trace<'v> for CheckRefValue<'v> {
    fn trace(&mut self, tracer: &starlark::values::Tracer<'v>) {
        tracer.trace(&mut self.callable);
        for v in self.bound_kwargs.values_mut() {
            tracer.trace(v);
        }
    }
}

unsafe impl<'v> Freeze for CheckRefValue<'v> {
    type Frozen = FrozenCheckRefValue;

    fn freeze(self, freezer: &Freezer) -> anyhow::Result<Self::Frozen> {
        let mut bound_kwargs = BTreeMap::new();
        for (k, v) in self.bound_kwargs {
            bound_kwargs.insert(k, freezer.freeze(v)?);
        }
        Ok(FrozenCheckRefValue {
            name: self.name,
            formatter: self.formatter,
            callable: freezer.freeze(self.callable)?,
            bound_kwargs,
        })
    }
}

impl<'v> AllocValue<'v> for CheckRefValue<'v> {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex(self)
    }
}

pub(crate) const CHECK_REF_ATTRS: &[&str] = &["name", "formatter"];

#[starlark_value(type = "CheckRef")]
impl<'v> StarlarkValue<'v> for CheckRefValue<'v> {
    fn has_attr(&self, attribute: &str, _heap: &'v Heap) -> bool {
        CHECK_REF_ATTRS.contains(&attribute)
    }

    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        match attribute {
            "name" => Some(heap.alloc_str(&self.name).to_value()),
            "formatter" => Some(Value::new_bool(self.formatter)),
            _ => None,
        }
    }

    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(check_ref_methods)
    }
}

/// The frozen twin of `CheckRefValue`, reachable after a module's
/// `Module::freeze()` (e.g. when re-exported from one module's `load()` and
/// used by another).
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct FrozenCheckRefValue {
    pub name: String,
    pub formatter: bool,
    pub callable: FrozenValue,
    pub bound_kwargs: BTreeMap<String, FrozenValue>,
}

impl std::fmt::Display for FrozenCheckRefValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CheckRef(name={:?}, formatter={})", self.name, self.formatter)
    }
}

starlark::starlark_simple_value!(FrozenCheckRefValue);

#[starlark_value(type = "CheckRef")]
impl<'v> StarlarkValue<'v> for FrozenCheckRefValue {
    fn has_attr(&self, attribute: &str, _heap: &'v Heap) -> bool {
        CHECK_REF_ATTRS.contains(&attribute)
    }

    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        match attribute {
            "name" => Some(heap.alloc_str(&self.name).to_value()),
            "formatter" => Some(Value::new_bool(self.formatter)),
            _ => None,
        }
    }

    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(check_ref_methods)
    }
}

pub(crate) const CHECK_REF_METHODS: &[&str] = &["with_args", "with_name"];

#[starlark_module]
fn check_ref_methods(builder: &mut MethodsBuilder) {
    /// `with_args(**kwargs)` — a new CheckRef sharing `impl`, with
    /// additional bound kwargs merged over any already bound.
    fn with_args<'v>(
        this: Value<'v>,
        heap: &'v Heap,
        #[starlark(kwargs)] kwargs: starlark::values::dict::DictRef<'v>,
    ) -> anyhow::Result<Value<'v>> {
        let base = downcast_check_ref(this)?;
        let mut bound_kwargs = base.bound_kwargs.clone();
        for (k, v) in kwargs.iter() {
            let key = k
                .unpack_str()
                .ok_or_else(|| anyhow::anyhow!("with_args keys must be strings"))?
                .to_string();
            bound_kwargs.insert(key, v);
        }
        Ok(heap.alloc(CheckRefValue {
            name: base.name,
            formatter: base.formatter,
            callable: base.callable,
            bound_kwargs,
        }))
    }

    /// `with_name(n)` — a new CheckRef sharing `impl` and bound kwargs,
    /// under a different name.
    fn with_name<'v>(this: Value<'v>, heap: &'v Heap, n: &str) -> anyhow::Result<Value<'v>> {
        let base = downcast_check_ref(this)?;
        Ok(heap.alloc(CheckRefValue {
            name: n.to_string(),
            formatter: base.formatter,
            callable: base.callable,
            bound_kwargs: base.bound_kwargs,
        }))
    }
}

/// Read a `CheckRefValue`'s fields back out of an opaque `Value`, whether
/// still unfrozen (module being evaluated) or already frozen (a CheckRef
/// constructed in a previously-loaded module, re-exposed via `load()`).
fn downcast_check_ref<'v>(v: Value<'v>) -> anyhow::Result<CheckRefValue<'v>> {
    if let Some(live) = v.downcast_ref::<CheckRefValue<'v>>() {
        return Ok(live.clone());
    }
    if let Some(frozen) = v.downcast_ref::<FrozenCheckRefValue>() {
        return Ok(CheckRefValue {
            name: frozen.name.clone(),
            formatter: frozen.formatter,
            callable: frozen.callable.to_value(),
            bound_kwargs: frozen.bound_kwargs.iter().map(|(k, v)| (k.clone(), v.to_value())).collect(),
        });
    }
    Err(anyhow::anyhow!("expected a CheckRef"))
}

// ---------------------------------------------------------------------
// RegistrationList: the side-channel that survives `Module::freeze()` via
// `Module::set_extra_value`, carrying every `shac.register_check(...)` call
// made during phase 1 evaluation of one module.
// ---------------------------------------------------------------------

#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct RegistrationList<'v> {
    #[allocative(skip)]
    entries: RefCell<Vec<CheckRefValue<'v>>>,
}

impl<'v> RegistrationList<'v> {
    pub fn new() -> Self {
        Self { entries: RefCell::new(Vec::new()) }
    }

    fn push(&self, entry: CheckRefValue<'v>) {
        self.entries.borrow_mut().push(entry);
    }
}

impl Default for RegistrationList<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RegistrationList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegistrationList(len={})", self.entries.borrow().len())
    }
}

unsafe impl<'v> Trace<'v> for RegistrationList<'v> {
    fn trace(&mut self, tracer: &starlark::values::Tracer<'v>) {
        for entry in self.entries.get_mut() {
            tracer.trace(&mut entry.callable);
            for v in entry.bound_kwargs.values_mut() {
                tracer.trace(v);
            }
        }
    }
}

unsafe impl<'v> Freeze for RegistrationList<'v> {
    type Frozen = FrozenRegistrationList;

    fn freeze(self, freezer: &Freezer) -> anyhow::Result<Self::Frozen> {
        let mut frozen = Vec::new();
        for entry in self.entries.into_inner() {
            let mut bound_kwargs = BTreeMap::new();
            for (k, v) in entry.bound_kwargs {
                bound_kwargs.insert(k, freezer.freeze(v)?);
            }
            frozen.push(FrozenRegistration {
                name: entry.name,
                formatter: entry.formatter,
                callable: freezer.freeze(entry.callable)?,
                bound_kwargs,
            });
        }
        Ok(FrozenRegistrationList { entries: frozen })
    }
}

impl<'v> AllocValue<'v> for RegistrationList<'v> {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex(self)
    }
}

#[starlark_value(type = "RegistrationList")]
impl<'v> StarlarkValue<'v> for RegistrationList<'v> {}

#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct FrozenRegistrationList {
    pub entries: Vec<FrozenRegistration>,
}

impl std::fmt::Display for FrozenRegistrationList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegistrationList(len={})", self.entries.len())
    }
}

starlark::starlark_simple_value!(FrozenRegistrationList);

#[starlark_value(type = "RegistrationList")]
impl<'v> StarlarkValue<'v> for FrozenRegistrationList {}

// ---------------------------------------------------------------------
// ShacGlobalValue: the `shac` global itself.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct ShacGlobalValue {
    pub version: String,
    pub commit_hash: String,
    #[allocative(skip)]
    pub gate: PhaseGate,
}

impl std::fmt::Display for ShacGlobalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<shac>")
    }
}

unsafe impl<'v> Trace<'v> for ShacGlobalValue {
    fn trace(&mut self, _tracer: &starlark::values::Tracer<'v>) {}
}

impl<'v> AllocValue<'v> for ShacGlobalValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex_no_freeze(self)
    }
}

pub(crate) const SHAC_ATTRS: &[&str] = &["version", "commit_hash"];

#[starlark_value(type = "shac")]
impl<'v> StarlarkValue<'v> for ShacGlobalValue {
    fn has_attr(&self, attribute: &str, _heap: &'v Heap) -> bool {
        SHAC_ATTRS.contains(&attribute)
    }

    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        match attribute {
            "version" => Some(heap.alloc_str(&self.version).to_value()),
            "commit_hash" => Some(heap.alloc_str(&self.commit_hash).to_value()),
            _ => None,
        }
    }

    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(shac_methods)
    }
}

/// Fetch the `RegistrationList` attached to the currently-evaluating module
/// via `Module::set_extra_value` (the engine sets this before evaluation
/// starts, so it is always already present here).
fn registration_list<'v>(eval: &starlark::eval::Evaluator<'v, '_, '_>) -> anyhow::Result<Value<'v>> {
    eval.module()
        .extra_value()
        .ok_or_else(|| anyhow::anyhow!("internal error: module has no registration list attached"))
}

pub(crate) const SHAC_METHODS: &[&str] = &["check", "register_check"];

#[starlark_module]
fn shac_methods(builder: &mut MethodsBuilder) {
    /// `shac.check(impl, name=None, formatter=False)` (spec §4.E).
    fn check<'v>(
        this: &ShacGlobalValue,
        heap: &'v Heap,
        r#impl: Value<'v>,
        name: Option<&str>,
        formatter: Option<bool>,
    ) -> anyhow::Result<Value<'v>> {
        let _ = this;
        let resolved_name = name.map(|s| s.to_string()).unwrap_or_else(|| callable_display_name(r#impl));
        Ok(heap.alloc(CheckRefValue {
            name: resolved_name,
            formatter: formatter.unwrap_or(false),
            callable: r#impl,
            bound_kwargs: BTreeMap::new(),
        }))
    }

    /// `shac.register_check(check_or_callable)` — valid only during phase 1
    /// (testable property 2); cross-module name-uniqueness is the
    /// `registry::CheckRegistry`'s job, not this call's.
    fn register_check<'v>(
        this: &ShacGlobalValue,
        eval: &mut starlark::eval::Evaluator<'v, '_, '_>,
        check_or_callable: Value<'v>,
    ) -> anyhow::Result<starlark::values::none::NoneType> {
        if this.gate.is_closed() {
            return Err(ShacError::Load(LoadError::RegisterAfterPhase1).into());
        }
        let check_ref = if check_or_callable.downcast_ref::<CheckRefValue<'v>>().is_some()
            || check_or_callable.downcast_ref::<FrozenCheckRefValue>().is_some()
        {
            downcast_check_ref(check_or_callable)?
        } else {
            CheckRefValue {
                name: callable_display_name(check_or_callable),
                formatter: false,
                callable: check_or_callable,
                bound_kwargs: BTreeMap::new(),
            }
        };

        let list_value = registration_list(eval)?;
        let list = list_value
            .downcast_ref::<RegistrationList<'v>>()
            .ok_or_else(|| anyhow::anyhow!("internal error: registration list has wrong type"))?;
        list.push(check_ref);
        Ok(starlark::values::none::NoneType)
    }
}

/// Best-effort extraction of a Starlark callable's declared name, used as
/// `shac.check(...)`'s default `name` and for bare-callable registration.
/// There is no `StarlarkValue` accessor for a `def`'s name that does not
/// require downcasting to starlark's own (private) function type, so this
/// parses it back out of the printed form instead.
fn callable_display_name(v: Value) -> String {
    let repr = v.to_repr();
    let ident: String = repr
        .trim_start_matches("<function ")
        .trim_start_matches("def ")
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if ident.is_empty() {
        "check".to_string()
    } else {
        ident
    }
}

/// Build the `Globals` used for phase-1 evaluation, with `shac` bound to a
/// fresh `ShacGlobalValue` sharing `gate` so `register_check` sees the same
/// "phase 1 closed" flag across every entry point module in this run.
pub fn build_phase1_globals(gate: PhaseGate, commit_hash: String) -> starlark::environment::Globals {
    let shac_value =
        ShacGlobalValue { version: env!("CARGO_PKG_VERSION").to_string(), commit_hash, gate };
    let mut builder = GlobalsBuilder::standard();
    builder.set("shac", shac_value);
    builder.build()
}
