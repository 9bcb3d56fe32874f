//! The execution context: configuration, registry, and the loading pipeline.
//!
//! A [`LoaderContext`] is the module subsystem of one isolated execution
//! context. Every entry point (require-style, import-module, dynamic) runs
//! the same synchronous pipeline: virtual table, resolver, registry, reader,
//! external compiler, recursive dependency requests, body evaluation. All of
//! it runs to completion on the calling thread; re-entry happens only through
//! a module body's own scope, never concurrently.

use crate::builtins::VirtualModules;
use crate::compiler::ModuleCompiler;
use crate::config::LoaderConfig;
use crate::error::{LoadError, LoadResult};
use crate::registry::{Presentation, Registry, Requested};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use stoat_core::{NamespaceRef, Value};
use tracing::debug;

/// The module subsystem of one execution context.
pub struct LoaderContext {
    config: RefCell<LoaderConfig>,
    compiler: Rc<dyn ModuleCompiler>,
    registry: Registry,
    virtuals: VirtualModules,
    entry_key: RefCell<Option<String>>,
}

impl LoaderContext {
    pub fn new(config: LoaderConfig, compiler: Rc<dyn ModuleCompiler>) -> Self {
        Self {
            config: RefCell::new(config),
            compiler,
            registry: Registry::new(),
            virtuals: VirtualModules::new(),
            entry_key: RefCell::new(None),
        }
    }

    /// The current loader configuration. Replace pieces through
    /// [`LoaderContext::config_mut`] between loads.
    pub fn config(&self) -> Ref<'_, LoaderConfig> {
        self.config.borrow()
    }

    pub fn config_mut(&self) -> RefMut<'_, LoaderConfig> {
        self.config.borrow_mut()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn virtual_modules(&self) -> &VirtualModules {
        &self.virtuals
    }

    /// Register a virtual module under `name`, built from `exports`.
    ///
    /// Lookup of `name` bypasses the resolver and reader. Defining a name
    /// after it has already been requested has no effect on the cached
    /// module.
    pub fn define_virtual(
        &self,
        name: impl Into<String>,
        exports: impl IntoIterator<Item = (String, Value)>,
    ) -> NamespaceRef {
        self.virtuals.define(name, exports)
    }

    /// Canonical key of the designated entry module, once one was loaded.
    pub fn entry_key(&self) -> Option<String> {
        self.entry_key.borrow().clone()
    }

    /// Resolve `specifier` against `referrer` using the configured resolver.
    pub fn resolve(&self, specifier: &str, referrer: Option<&str>) -> LoadResult<String> {
        let config = self.config.borrow();
        config
            .resolver
            .resolve(specifier, referrer, &config.resolve_options())
    }

    /// Require-style entry point: synchronously returns the module's
    /// namespace, or its override value if the module assigned one.
    pub fn require(&self, specifier: &str, referrer: Option<&str>) -> LoadResult<Value> {
        self.request_from(specifier, referrer, false)
    }

    /// Import-module entry point. Same pipeline, same cached identity as
    /// [`LoaderContext::require`]; the goal flag is passed to the compiler.
    pub fn import_module(&self, specifier: &str, referrer: Option<&str>) -> LoadResult<Value> {
        self.request_from(specifier, referrer, true)
    }

    /// Dynamic entry point: runs the same synchronous pipeline and hands the
    /// settled result to the host's completion mechanism.
    pub fn import_dynamic(&self, specifier: &str, referrer: Option<&str>) -> DynamicImport {
        DynamicImport {
            result: self.request_from(specifier, referrer, true),
        }
    }

    /// Load `specifier` as the designated entry module.
    pub fn load_entry(&self, specifier: &str) -> LoadResult<Value> {
        let key = if specifier.starts_with('.') {
            self.resolve(specifier, None)?
        } else {
            // Names and scheme-form keys resolve to themselves.
            specifier.to_string()
        };
        *self.entry_key.borrow_mut() = Some(key);
        self.request_from(specifier, None, true)
    }

    /// The single request path behind every entry point.
    fn request_from(
        &self,
        specifier: &str,
        referrer: Option<&str>,
        module_goal: bool,
    ) -> LoadResult<Value> {
        // Names bypass resolution: a cached record wins (so a later virtual
        // redefinition is not retroactive), then the virtual table.
        if !specifier.starts_with('.') {
            if let Some(hit) = self.registry.lookup(specifier) {
                self.note_edge(referrer, specifier);
                return settle(hit);
            }
            if let Some(namespace) = self.virtuals.get(specifier) {
                let presentation = self.registry.insert_evaluated(specifier, namespace);
                self.note_edge(referrer, specifier);
                return Ok(presentation.to_value());
            }
        }

        let key = self.resolve(specifier, referrer)?;
        self.note_edge(referrer, &key);
        self.load(&key, module_goal)
    }

    fn load(&self, key: &str, module_goal: bool) -> LoadResult<Value> {
        match self.registry.lookup(key) {
            Some(Requested::Evaluated(presentation)) => Ok(presentation.to_value()),
            Some(Requested::Failed(error)) => Err(error),
            // Cycle: hand back the live, possibly-incomplete namespace rather
            // than blocking or erroring. It is the same object the original
            // load will finish populating.
            Some(Requested::InFlight(namespace)) => Ok(Value::Namespace(namespace)),
            None => self.load_new(key, module_goal),
        }
    }

    fn load_new(&self, key: &str, module_goal: bool) -> LoadResult<Value> {
        debug!(key, "loading module");
        let (namespace, override_slot) = self.registry.create(key);
        match self.run_pipeline(key, module_goal, &namespace, &override_slot) {
            Ok(presentation) => {
                self.registry.complete(key, presentation.clone());
                Ok(presentation.to_value())
            }
            Err(error) => {
                self.registry.fail(key, &error);
                Err(error)
            }
        }
    }

    fn run_pipeline(
        &self,
        key: &str,
        module_goal: bool,
        namespace: &NamespaceRef,
        override_slot: &Rc<RefCell<Option<Value>>>,
    ) -> LoadResult<Presentation> {
        self.registry.begin_loading(key);

        let source = {
            let config = self.config.borrow();
            config.reader.read(key, &config.compilers)?
        };

        let unit = self
            .compiler
            .compile(key, &source, module_goal)
            .map_err(|e| LoadError::compile(key, e))?;
        let dependencies = unit.dependencies.clone();
        self.registry.link(key, unit.clone());

        // Static dependencies, in declaration order. A dependency that is
        // already in flight is the cycle case and is not re-entered.
        for dep_specifier in &dependencies {
            self.request_from(dep_specifier, Some(key), true)?;
        }

        let scope = ModuleScope {
            ctx: self,
            key,
            exports: namespace.clone(),
            override_slot: override_slot.clone(),
        };
        (unit.body)(&scope).map_err(|e| LoadError::evaluation(key, e))?;

        // Presentation is decided once, now: if the body assigned the
        // override slot, that value replaces the namespace for every
        // consumer from here on.
        let presentation = match override_slot.borrow_mut().take() {
            Some(value) => Presentation::Override(value),
            None => Presentation::Namespace(namespace.clone()),
        };
        Ok(presentation)
    }

    fn note_edge(&self, dependent: Option<&str>, dep_key: &str) {
        if let Some(parent) = dependent {
            self.registry.add_dependency(parent, dep_key);
            self.registry.add_dependent(dep_key, parent);
        }
    }
}

/// What an executing module body sees of its own record and of the context.
pub struct ModuleScope<'a> {
    ctx: &'a LoaderContext,
    key: &'a str,
    exports: NamespaceRef,
    override_slot: Rc<RefCell<Option<Value>>>,
}

impl ModuleScope<'_> {
    /// The module's own canonical key.
    pub fn key(&self) -> &str {
        self.key
    }

    /// Whether this module is the designated entry module.
    pub fn is_entry(&self) -> bool {
        self.ctx.entry_key.borrow().as_deref() == Some(self.key)
    }

    /// Require-style entry point bound to this module as referrer.
    pub fn require(&self, specifier: &str) -> LoadResult<Value> {
        self.ctx.request_from(specifier, Some(self.key), false)
    }

    /// The live exports namespace. The same object every consumer holds.
    pub fn exports(&self) -> &NamespaceRef {
        &self.exports
    }

    pub fn export(&self, name: impl Into<String>, value: Value) {
        self.exports.set(name, value);
    }

    /// Assign the override slot: consumers will receive `value` instead of
    /// the namespace once evaluation finishes.
    pub fn set_exports_override(&self, value: Value) {
        *self.override_slot.borrow_mut() = Some(value);
    }

    pub fn exports_override(&self) -> Option<Value> {
        self.override_slot.borrow().clone()
    }
}

fn settle(hit: Requested) -> LoadResult<Value> {
    match hit {
        Requested::Evaluated(presentation) => Ok(presentation.to_value()),
        Requested::Failed(error) => Err(error),
        Requested::InFlight(namespace) => Ok(Value::Namespace(namespace)),
    }
}

/// The settled result of a dynamic import.
///
/// The pipeline already ran synchronously; this type only adapts the outcome
/// to the host's async-completion mechanism.
#[derive(Debug)]
pub struct DynamicImport {
    result: LoadResult<Value>,
}

impl DynamicImport {
    pub fn settled(&self) -> &LoadResult<Value> {
        &self.result
    }

    pub fn is_fulfilled(&self) -> bool {
        self.result.is_ok()
    }

    /// Hand the settled result to a completion callback.
    pub fn on_settled(self, complete: impl FnOnce(LoadResult<Value>)) {
        complete(self.result);
    }

    pub fn into_result(self) -> LoadResult<Value> {
        self.result
    }
}
