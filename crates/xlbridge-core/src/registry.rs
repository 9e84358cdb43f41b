use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::converter::ConverterRegistry;
use crate::descriptor::{FuncOptions, FunctionDescriptor, build_descriptor};
use crate::engine::{Engine, ModuleId, RegisterReport, Scope};
use crate::error::{DeclarationError, EngineError};
use crate::function::UserFunction;
use crate::log::{LogLevel, LogSink, TracingSink};
use crate::signature::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u64);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// A declared function: the original callable plus the id of its descriptor
/// in the owning [`RegistrationContext`].
#[derive(Debug, Clone)]
pub struct WorksheetFunction {
    pub id: FunctionId,
    pub module: ModuleId,
    pub func: UserFunction,
}

/// Result of a `func` declaration.
#[derive(Debug, Clone)]
pub enum Decorated {
    Registered(WorksheetFunction),
    /// The declaration failed; the original callable is handed back unchanged.
    Skipped(UserFunction),
}

impl Decorated {
    pub fn function(&self) -> &UserFunction {
        match self {
            Decorated::Registered(w) => &w.func,
            Decorated::Skipped(f) => f,
        }
    }

    pub fn id(&self) -> Option<FunctionId> {
        match self {
            Decorated::Registered(w) => Some(w.id),
            Decorated::Skipped(_) => None,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, Decorated::Registered(_))
    }
}

#[derive(Default)]
struct SideTable {
    descriptors: HashMap<FunctionId, (ModuleId, Arc<FunctionDescriptor>)>,
    pending: HashMap<ModuleId, BTreeSet<FunctionId>>,
}

/// Owns descriptors for declared functions and the per-module queues of
/// functions waiting to be registered with an [`Engine`].
pub struct RegistrationContext {
    converters: Arc<ConverterRegistry>,
    sink: Arc<dyn LogSink>,
    next_id: AtomicU64,
    table: Mutex<SideTable>,
}

impl RegistrationContext {
    pub fn new(converters: Arc<ConverterRegistry>) -> Self {
        Self::with_sink(converters, Arc::new(TracingSink))
    }

    pub fn with_sink(converters: Arc<ConverterRegistry>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            converters,
            sink,
            next_id: AtomicU64::new(1),
            table: Mutex::new(SideTable::default()),
        }
    }

    fn table(&self) -> MutexGuard<'_, SideTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    /// Build a descriptor without recording it.
    pub fn describe(
        &self,
        name: &str,
        func: &UserFunction,
        signature: &Signature,
        options: &FuncOptions,
    ) -> Result<FunctionDescriptor, DeclarationError> {
        build_descriptor(name, func, signature, options, &self.converters)
    }

    /// Declare `func` as a worksheet function of `module`.
    ///
    /// On success the descriptor is recorded and, unless the options say
    /// otherwise, queued in the module's pending set. On failure the error is
    /// logged and the callable is returned unchanged.
    pub fn func(
        &self,
        module: &ModuleId,
        name: &str,
        func: UserFunction,
        signature: &Signature,
        options: &FuncOptions,
    ) -> Decorated {
        let descriptor = match self.describe(name, &func, signature, options) {
            Ok(d) => d,
            Err(e) => {
                self.sink
                    .log(&format!("Failed determining spec for '{name}': {e}"), LogLevel::Error);
                return Decorated::Skipped(func);
            }
        };

        let id = FunctionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sink.log(
            &format!("Found func: '{}' in module '{module}'", descriptor.name),
            LogLevel::Debug,
        );

        let mut table = self.table();
        table
            .descriptors
            .insert(id, (module.clone(), Arc::new(descriptor)));
        if options.register {
            table.pending.entry(module.clone()).or_default().insert(id);
        }

        Decorated::Registered(WorksheetFunction {
            id,
            module: module.clone(),
            func,
        })
    }

    pub fn descriptor(&self, id: FunctionId) -> Option<Arc<FunctionDescriptor>> {
        self.table().descriptors.get(&id).map(|(_, d)| d.clone())
    }

    pub fn pending(&self, module: &ModuleId) -> Vec<Arc<FunctionDescriptor>> {
        let table = self.table();
        table
            .pending
            .get(module)
            .into_iter()
            .flatten()
            .filter_map(|id| table.descriptors.get(id).map(|(_, d)| d.clone()))
            .collect()
    }

    pub fn clear_pending(&self, module: &ModuleId) {
        self.table().pending.remove(module);
    }

    /// Forget everything declared by `module` ahead of re-importing it.
    pub fn reload_module(&self, module: &ModuleId) {
        let mut table = self.table();
        table.pending.remove(module);
        let before = table.descriptors.len();
        table.descriptors.retain(|_, (owner, _)| owner != module);
        tracing::info!(
            module = %module,
            dropped = before - table.descriptors.len(),
            "Reloading module declarations"
        );
    }

    /// Submit the module's pending functions with `append = false`, then
    /// clear the pending set. An empty pending set is a no-op.
    pub fn scan_module(
        &self,
        module: &ModuleId,
        engine: &dyn Engine,
        scope: &Scope,
    ) -> Result<RegisterReport, EngineError> {
        let pending = self.pending(module);
        if pending.is_empty() {
            return Ok(RegisterReport::default());
        }
        let report = engine.register(&pending, module, scope, false)?;
        self.clear_pending(module);
        Ok(report)
    }

    /// Register already-declared functions directly, also adding them to
    /// the module's pending set so a later scan keeps them.
    pub fn register_functions(
        &self,
        funcs: &[WorksheetFunction],
        module: &ModuleId,
        engine: &dyn Engine,
        scope: &Scope,
        append: bool,
    ) -> Result<RegisterReport, EngineError> {
        let descriptors: Vec<Arc<FunctionDescriptor>> = {
            let mut table = self.table();
            let found: Vec<_> = funcs
                .iter()
                .filter_map(|f| table.descriptors.get(&f.id).map(|(_, d)| (f.id, d.clone())))
                .collect();
            let pending = table.pending.entry(module.clone()).or_default();
            found
                .into_iter()
                .map(|(id, d)| {
                    pending.insert(id);
                    d
                })
                .collect()
        };
        engine.register(&descriptors, module, scope, append)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FunctionTable;
    use crate::signature::{Annotation, Param};
    use crate::value::Value;

    #[derive(Default)]
    struct CaptureSink {
        lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl LogSink for CaptureSink {
        fn log(&self, message: &str, level: LogLevel) {
            self.lines.lock().unwrap().push((level, message.to_string()));
        }
    }

    fn ctx_with_sink() -> (RegistrationContext, Arc<CaptureSink>) {
        let sink = Arc::new(CaptureSink::default());
        let ctx = RegistrationContext::with_sink(Arc::new(ConverterRegistry::new()), sink.clone());
        (ctx, sink)
    }

    fn plain() -> UserFunction {
        UserFunction::plain(|_| Ok(Value::Int(1)))
    }

    #[test]
    fn failed_declaration_returns_original_and_logs() {
        let (ctx, sink) = ctx_with_sink();
        let original = plain();
        let sig = Signature::new([Param::var_positional("args")]);
        let out = ctx.func(&"m".into(), "bad", original.clone(), &sig, &FuncOptions::new());

        let Decorated::Skipped(returned) = out else {
            panic!("expected skipped declaration");
        };
        assert!(returned.same_callable(&original));
        assert!(ctx.pending(&"m".into()).is_empty());

        let lines = sink.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, LogLevel::Error);
        assert!(lines[0].1.contains("bad"));
    }

    #[test]
    fn successful_declaration_is_pending() {
        let (ctx, _) = ctx_with_sink();
        let m = ModuleId::from("m");
        let sig = Signature::new([Param::positional("x").typed(Annotation::of("int"))]);
        let out = ctx.func(&m, "f", plain(), &sig, &FuncOptions::new());
        assert!(out.is_registered());
        let id = out.id().unwrap();
        assert_eq!(ctx.descriptor(id).unwrap().name, "f");
        assert_eq!(ctx.pending(&m).len(), 1);

        let out = ctx.func(&m, "g", plain(), &sig, &FuncOptions::new().unregistered());
        assert!(out.is_registered());
        assert_eq!(ctx.pending(&m).len(), 1);
    }

    #[test]
    fn scan_module_registers_and_clears() {
        let (ctx, _) = ctx_with_sink();
        let engine = FunctionTable::new();
        let m = ModuleId::from("m");
        ctx.func(&m, "f", plain(), &Signature::default(), &FuncOptions::new());
        ctx.func(&m, "g", plain(), &Signature::default(), &FuncOptions::new());

        let report = ctx.scan_module(&m, &engine, &Scope::Global).unwrap();
        assert_eq!(report.added, 2);
        assert!(ctx.pending(&m).is_empty());
        assert_eq!(engine.len(), 2);

        let report = ctx.scan_module(&m, &engine, &Scope::Global).unwrap();
        assert_eq!(report, RegisterReport::default());
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn reload_then_scan_replaces_module() {
        let (ctx, _) = ctx_with_sink();
        let engine = FunctionTable::new();
        let m = ModuleId::from("m");
        let old = ctx.func(&m, "f", plain(), &Signature::default(), &FuncOptions::new());
        ctx.func(&m, "g", plain(), &Signature::default(), &FuncOptions::new());
        ctx.scan_module(&m, &engine, &Scope::Global).unwrap();

        ctx.reload_module(&m);
        assert!(ctx.descriptor(old.id().unwrap()).is_none());
        ctx.func(&m, "g", plain(), &Signature::default(), &FuncOptions::new());
        let report = ctx.scan_module(&m, &engine, &Scope::Global).unwrap();
        assert_eq!(report.retracted, 1);
        assert_eq!(engine.names(), vec!["g".to_string()]);
    }

    #[test]
    fn reload_with_same_signature_swaps_callable() {
        let (ctx, _) = ctx_with_sink();
        let engine = FunctionTable::new();
        let m = ModuleId::from("m");
        ctx.func(&m, "f", plain(), &Signature::default(), &FuncOptions::new());
        ctx.scan_module(&m, &engine, &Scope::Global).unwrap();

        ctx.reload_module(&m);
        let reloaded = UserFunction::plain(|_| Ok(Value::Int(2)));
        ctx.func(&m, "f", reloaded.clone(), &Signature::default(), &FuncOptions::new());
        let report = ctx.scan_module(&m, &engine, &Scope::Global).unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.replaced, 0);

        let registered = engine.lookup(None, "f").unwrap();
        assert!(registered.descriptor.func.same_callable(&reloaded));
        let UserFunction::Plain(f) = &registered.descriptor.func else {
            panic!("expected plain function");
        };
        assert_eq!(f(Default::default()).unwrap(), Value::Int(2));
    }

    #[test]
    fn register_functions_directly() {
        let (ctx, _) = ctx_with_sink();
        let engine = FunctionTable::new();
        let m = ModuleId::from("m");
        let Decorated::Registered(f) =
            ctx.func(&m, "f", plain(), &Signature::default(), &FuncOptions::new().unregistered())
        else {
            panic!("expected registered");
        };
        assert!(ctx.pending(&m).is_empty());

        let report = ctx
            .register_functions(&[f], &m, &engine, &Scope::Global, true)
            .unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(ctx.pending(&m).len(), 1);

        ctx.clear_pending(&m);
        assert!(ctx.pending(&m).is_empty());
    }
}
