//! Check registry (spec §4.E): `shac.check()`/`shac.register_check()`
//! bookkeeping, name uniqueness, and the formatter filter applied before
//! phase 2.
//!
//! `CheckDef` is the plain-data half of a registered check; the Starlark
//! callable value itself (`hostapi::shac_global::CheckRefValue`) holds a
//! `FrozenValue` pointing back at one of these by name. Kept as two halves
//! rather than one so the registry can be inspected/filtered (`--only`,
//! `--skip`, formatter mode) without touching the Starlark heap.

use std::collections::BTreeMap;

use starlark::values::FrozenValue;

use crate::error::{LoadError, ShacError, UsageError};

/// One registered check: the callable to invoke in phase 2, its declared
/// name, whether it is a formatter, and any `with_args(**kw)` bound kwargs.
#[derive(Debug, Clone)]
pub struct CheckDef {
    pub name: String,
    pub callable: FrozenValue,
    pub formatter: bool,
    pub bound_kwargs: BTreeMap<String, FrozenValue>,
}

#[derive(Debug, Default)]
pub struct CheckRegistry {
    checks: Vec<CheckDef>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check, enforcing name uniqueness within this run
    /// (testable property 3).
    pub fn register(&mut self, def: CheckDef) -> Result<(), ShacError> {
        if self.checks.iter().any(|c| c.name == def.name) {
            return Err(LoadError::DuplicateCheckName(def.name).into());
        }
        self.checks.push(def);
        Ok(())
    }

    pub fn all(&self) -> &[CheckDef] {
        &self.checks
    }

    /// Apply `--only`/`--skip` allow/deny lists, then the formatter filter.
    /// An empty result after filtering is a `UsageError` (spec §4.E).
    pub fn select(
        &self,
        only: Option<&[String]>,
        skip: &[String],
        formatter_filter: FormatterFilter,
    ) -> Result<Vec<&CheckDef>, ShacError> {
        if let Some(only) = only {
            for name in only {
                if !self.checks.iter().any(|c| &c.name == name) {
                    return Err(UsageError::UnknownCheck(name.clone()).into());
                }
            }
        }
        for name in skip {
            if !self.checks.iter().any(|c| &c.name == name) {
                return Err(UsageError::UnknownCheck(name.clone()).into());
            }
        }

        let selected: Vec<&CheckDef> = self
            .checks
            .iter()
            .filter(|c| only.map(|names| names.contains(&c.name)).unwrap_or(true))
            .filter(|c| !skip.contains(&c.name))
            .filter(|c| formatter_filter.accepts(c.formatter))
            .collect();

        if selected.is_empty() {
            return Err(UsageError::NoChecksSelected.into());
        }
        Ok(selected)
    }
}

/// The three formatter filter modes (spec §4.E): `shac check` uses `All`,
/// `shac fmt` uses `OnlyFormatters`, `shac fix` uses `ExcludeFormatters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatterFilter {
    All,
    OnlyFormatters,
    ExcludeFormatters,
}

impl FormatterFilter {
    fn accepts(self, is_formatter: bool) -> bool {
        match self {
            FormatterFilter::All => true,
            FormatterFilter::OnlyFormatters => is_formatter,
            FormatterFilter::ExcludeFormatters => !is_formatter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starlark::values::FrozenHeap;

    fn dummy_check(name: &str, formatter: bool) -> CheckDef {
        let heap = Box::leak(Box::new(FrozenHeap::new()));
        CheckDef {
            name: name.to_string(),
            callable: heap.alloc(starlark::values::none::NoneType),
            formatter,
            bound_kwargs: BTreeMap::new(),
        }
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut reg = CheckRegistry::new();
        reg.register(dummy_check("a", false)).unwrap();
        let err = reg.register(dummy_check("a", false)).unwrap_err();
        assert!(matches!(err, ShacError::Load(LoadError::DuplicateCheckName(_))));
    }

    #[test]
    fn formatter_filter_excludes_non_formatters_for_fmt() {
        let mut reg = CheckRegistry::new();
        reg.register(dummy_check("fmt_check", true)).unwrap();
        reg.register(dummy_check("lint_check", false)).unwrap();
        let selected = reg.select(None, &[], FormatterFilter::OnlyFormatters).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "fmt_check");
    }

    #[test]
    fn empty_selection_is_usage_error() {
        let mut reg = CheckRegistry::new();
        reg.register(dummy_check("fmt_check", true)).unwrap();
        let err = reg.select(None, &[], FormatterFilter::ExcludeFormatters).unwrap_err();
        assert!(matches!(err, ShacError::Usage(UsageError::NoChecksSelected)));
    }

    #[test]
    fn unknown_only_name_is_usage_error() {
        let reg = CheckRegistry::new();
        let err = reg.select(Some(&["nope".to_string()]), &[], FormatterFilter::All).unwrap_err();
        assert!(matches!(err, ShacError::Usage(UsageError::UnknownCheck(_))));
    }
}
