use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::descriptor::FunctionDescriptor;
use crate::error::EngineError;

/// Name of the module that owns a set of declarations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Where functions are registered: globally, or local to one workbook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Scope {
    Global,
    Workbook(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegisterReport {
    pub added: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub retracted: usize,
}

/// The host's function-registration storage.
pub trait Engine: Send + Sync {
    /// Register `descriptors` for `module`. With `append == false` the
    /// module's previous registrations that are not in `descriptors` are
    /// retracted in the same step.
    fn register(
        &self,
        descriptors: &[Arc<FunctionDescriptor>],
        module: &ModuleId,
        scope: &Scope,
        append: bool,
    ) -> Result<RegisterReport, EngineError>;
}

#[derive(Debug, Clone)]
pub struct Registered {
    pub module: ModuleId,
    pub scope: Scope,
    pub fingerprint: String,
    pub descriptor: Arc<FunctionDescriptor>,
}

/// In-process [`Engine`]: a name-keyed function table.
///
/// Repeat registrations with an identical fingerprint are no-ops. Local
/// functions are keyed under the workbook scope; everything else is global.
#[derive(Debug, Default)]
pub struct FunctionTable {
    entries: RwLock<HashMap<(Scope, String), Registered>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope: &Scope, name: &str) -> Option<Registered> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&(scope.clone(), name.to_string())).cloned()
    }

    /// Look a name up in a workbook scope first, then globally.
    pub fn lookup(&self, workbook: Option<&str>, name: &str) -> Option<Registered> {
        if let Some(wb) = workbook
            && let Some(found) = self.get(&Scope::Workbook(wb.to_string()), name)
        {
            return Some(found);
        }
        self.get(&Scope::Global, name)
    }

    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = entries.keys().map(|(_, n)| n.clone()).collect();
        names.sort();
        names
    }

    pub fn descriptors(&self) -> Vec<Arc<FunctionDescriptor>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = entries.values().map(|r| r.descriptor.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Remove everything `module` registered. Returns the number removed.
    pub fn deregister_module(&self, module: &ModuleId) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, r| &r.module != module);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!(module = %module, removed, "Deregistered module functions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn effective_scope(descriptor: &FunctionDescriptor, scope: &Scope) -> Scope {
    match scope {
        Scope::Workbook(_) if descriptor.flags.local => scope.clone(),
        _ => Scope::Global,
    }
}

impl Engine for FunctionTable {
    fn register(
        &self,
        descriptors: &[Arc<FunctionDescriptor>],
        module: &ModuleId,
        scope: &Scope,
        append: bool,
    ) -> Result<RegisterReport, EngineError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let keys: Vec<(Scope, String)> = descriptors
            .iter()
            .map(|d| (effective_scope(d, scope), d.name.clone()))
            .collect();

        // Validate before mutating so a conflict leaves the table untouched
        for key in &keys {
            if let Some(existing) = entries.get(key)
                && &existing.module != module
            {
                return Err(EngineError::NameConflict {
                    name: key.1.clone(),
                    owner: existing.module.to_string(),
                });
            }
        }

        let mut report = RegisterReport::default();

        if !append {
            let keep: HashSet<&(Scope, String)> = keys.iter().collect();
            let before = entries.len();
            entries.retain(|key, r| &r.module != module || keep.contains(key));
            report.retracted = before - entries.len();
        }

        for (key, descriptor) in keys.into_iter().zip(descriptors) {
            let fingerprint = descriptor.fingerprint();
            match entries.get_mut(&key) {
                // Same metadata: keep the registration but point it at the
                // current callable, which a reload may have replaced
                Some(existing) if existing.fingerprint == fingerprint => {
                    existing.descriptor = descriptor.clone();
                    report.unchanged += 1;
                    continue;
                }
                Some(_) => report.replaced += 1,
                None => report.added += 1,
            }
            tracing::debug!(function = %key.1, module = %module, "Registering function");
            entries.insert(
                key.clone(),
                Registered {
                    module: module.clone(),
                    scope: key.0,
                    fingerprint,
                    descriptor: descriptor.clone(),
                },
            );
        }

        tracing::info!(
            module = %module,
            added = report.added,
            replaced = report.replaced,
            unchanged = report.unchanged,
            retracted = report.retracted,
            "Registered module functions"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ConverterRegistry;
    use crate::descriptor::{FuncOptions, build_descriptor};
    use crate::function::UserFunction;
    use crate::signature::{Annotation, Param, Signature};
    use crate::value::Value;

    fn descriptor(name: &str, options: FuncOptions) -> Arc<FunctionDescriptor> {
        let func = UserFunction::plain(|_| Ok(Value::Nil));
        let sig = Signature::new([Param::positional("x").typed(Annotation::of("int"))]);
        Arc::new(build_descriptor(name, &func, &sig, &options, &ConverterRegistry::new()).unwrap())
    }

    #[test]
    fn register_then_lookup() {
        let table = FunctionTable::new();
        let m = ModuleId::from("mod_a");
        let report = table
            .register(&[descriptor("f", FuncOptions::new())], &m, &Scope::Global, true)
            .unwrap();
        assert_eq!(report.added, 1);
        assert!(table.lookup(None, "f").is_some());
        assert_eq!(table.names(), vec!["f".to_string()]);
    }

    #[test]
    fn identical_reregistration_is_unchanged() {
        let table = FunctionTable::new();
        let m = ModuleId::from("mod_a");
        table.register(&[descriptor("f", FuncOptions::new())], &m, &Scope::Global, true).unwrap();
        let report = table
            .register(&[descriptor("f", FuncOptions::new())], &m, &Scope::Global, true)
            .unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.added, 0);

        let report = table
            .register(&[descriptor("f", FuncOptions::new().volatile())], &m, &Scope::Global, true)
            .unwrap();
        assert_eq!(report.replaced, 1);
    }

    #[test]
    fn replace_by_module_retracts_missing() {
        let table = FunctionTable::new();
        let m = ModuleId::from("mod_a");
        table
            .register(
                &[descriptor("f", FuncOptions::new()), descriptor("g", FuncOptions::new())],
                &m,
                &Scope::Global,
                false,
            )
            .unwrap();
        let report = table
            .register(&[descriptor("g", FuncOptions::new())], &m, &Scope::Global, false)
            .unwrap();
        assert_eq!(report.retracted, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(table.names(), vec!["g".to_string()]);
    }

    #[test]
    fn name_conflict_across_modules() {
        let table = FunctionTable::new();
        table
            .register(&[descriptor("f", FuncOptions::new())], &"a".into(), &Scope::Global, true)
            .unwrap();
        let err = table
            .register(&[descriptor("f", FuncOptions::new())], &"b".into(), &Scope::Global, true)
            .unwrap_err();
        assert!(matches!(err, EngineError::NameConflict { ref owner, .. } if owner == "a"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn local_functions_land_in_workbook_scope() {
        let table = FunctionTable::new();
        let scope = Scope::Workbook("Book1.xlsx".into());
        table
            .register(
                &[
                    descriptor("loc", FuncOptions::new()),
                    descriptor("glob", FuncOptions::new().local(false)),
                ],
                &"m".into(),
                &scope,
                true,
            )
            .unwrap();
        assert!(table.get(&scope, "loc").is_some());
        assert!(table.get(&Scope::Global, "loc").is_none());
        assert!(table.get(&Scope::Global, "glob").is_some());
        assert!(table.lookup(Some("Book1.xlsx"), "loc").is_some());
        assert!(table.lookup(Some("Book1.xlsx"), "glob").is_some());
    }

    #[test]
    fn deregister_module_removes_only_its_functions() {
        let table = FunctionTable::new();
        table
            .register(&[descriptor("f", FuncOptions::new())], &"a".into(), &Scope::Global, true)
            .unwrap();
        table
            .register(&[descriptor("g", FuncOptions::new())], &"b".into(), &Scope::Global, true)
            .unwrap();
        assert_eq!(table.deregister_module(&"a".into()), 1);
        assert_eq!(table.names(), vec!["g".to_string()]);
    }
}
