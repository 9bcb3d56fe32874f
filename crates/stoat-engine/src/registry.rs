//! The module record registry.
//!
//! One registry exists per execution context. Records live in a flat arena
//! keyed by canonical key; dependency edges are key references, so cyclic
//! graphs are ordinary data with no ownership hazard. The record for a key is
//! created on first request and destroyed only with the registry itself;
//! a Failed record stays Failed and replays its original error.
//!
//! Re-entrancy: loading a module loads its dependencies through the same
//! registry on the same thread, so the arena sits behind a `RefCell` and no
//! method holds a borrow while module code can run.

use crate::compiler::CompiledUnit;
use crate::error::LoadError;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::rc::Rc;
use stoat_core::{NamespaceRef, Value};
use tracing::trace;

/// Lifecycle state of one module record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Record exists; reading has not begun.
    Unlinked,
    /// Reader/compiler are running.
    Loading,
    /// Compiled unit exists and its dependency list is known; dependencies
    /// may still be loading and the body has not run.
    Linked,
    Evaluated,
    Failed,
}

/// What a loaded module presents to consumers, decided once at the end of
/// its first evaluation.
#[derive(Debug, Clone)]
pub enum Presentation {
    /// The live namespace object itself.
    Namespace(NamespaceRef),
    /// The value the module assigned to its override slot; returned to every
    /// consumer in place of the namespace.
    Override(Value),
}

impl Presentation {
    pub fn to_value(&self) -> Value {
        match self {
            Presentation::Namespace(ns) => Value::Namespace(ns.clone()),
            Presentation::Override(value) => value.clone(),
        }
    }
}

struct ModuleRecord {
    state: ModuleState,
    /// Created with the record so cyclic importers can hold the same object
    /// the body later populates.
    namespace: NamespaceRef,
    /// Assigned by the body through its scope; inspected once after
    /// evaluation to decide the presentation.
    override_slot: Rc<RefCell<Option<Value>>>,
    presentation: Option<Presentation>,
    unit: Option<CompiledUnit>,
    /// Resolved dependency keys in declaration order.
    dependencies: Vec<String>,
    /// Back-references from modules that requested this one. Non-owning.
    dependents: FxHashSet<String>,
    error: Option<LoadError>,
}

impl ModuleRecord {
    fn new() -> Self {
        Self {
            state: ModuleState::Unlinked,
            namespace: NamespaceRef::new(),
            override_slot: Rc::new(RefCell::new(None)),
            presentation: None,
            unit: None,
            dependencies: Vec::new(),
            dependents: FxHashSet::default(),
            error: None,
        }
    }
}

/// Outcome of looking up an existing record.
pub(crate) enum Requested {
    /// The record has not finished evaluating. For a re-entrant request this
    /// is the cycle case, and the handle is the live, possibly-partial
    /// namespace that will be populated when the original load completes.
    InFlight(NamespaceRef),
    Evaluated(Presentation),
    /// Replay of the original failure.
    Failed(LoadError),
}

/// Arena of module records for one execution context.
#[derive(Default)]
pub struct Registry {
    records: RefCell<FxHashMap<String, ModuleRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.borrow().contains_key(key)
    }

    pub fn state_of(&self, key: &str) -> Option<ModuleState> {
        self.records.borrow().get(key).map(|r| r.state)
    }

    /// The live namespace object of a record, at whatever stage it is in.
    pub fn namespace_of(&self, key: &str) -> Option<NamespaceRef> {
        self.records.borrow().get(key).map(|r| r.namespace.clone())
    }

    /// Keys of modules that have requested `key`.
    pub fn dependents_of(&self, key: &str) -> Vec<String> {
        self.records
            .borrow()
            .get(key)
            .map(|r| r.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolved dependency keys of `key`, in declaration order.
    pub fn dependencies_of(&self, key: &str) -> Vec<String> {
        self.records
            .borrow()
            .get(key)
            .map(|r| r.dependencies.clone())
            .unwrap_or_default()
    }

    pub(crate) fn lookup(&self, key: &str) -> Option<Requested> {
        let records = self.records.borrow();
        let record = records.get(key)?;
        Some(match record.state {
            ModuleState::Unlinked | ModuleState::Loading | ModuleState::Linked => {
                Requested::InFlight(record.namespace.clone())
            }
            ModuleState::Evaluated => Requested::Evaluated(
                record
                    .presentation
                    .clone()
                    .unwrap_or(Presentation::Namespace(record.namespace.clone())),
            ),
            ModuleState::Failed => Requested::Failed(
                record
                    .error
                    .clone()
                    .unwrap_or_else(|| LoadError::read(key, "record failed without error")),
            ),
        })
    }

    /// Create the record for a first-time request. Returns the namespace
    /// handle and the override slot the body's scope will write through.
    pub(crate) fn create(&self, key: &str) -> (NamespaceRef, Rc<RefCell<Option<Value>>>) {
        trace!(key, "module record created");
        let record = ModuleRecord::new();
        let handles = (record.namespace.clone(), record.override_slot.clone());
        self.records.borrow_mut().insert(key.to_string(), record);
        handles
    }

    pub(crate) fn begin_loading(&self, key: &str) {
        self.transition(key, ModuleState::Loading);
    }

    pub(crate) fn link(&self, key: &str, unit: CompiledUnit) {
        if let Some(record) = self.records.borrow_mut().get_mut(key) {
            record.unit = Some(unit);
        }
        self.transition(key, ModuleState::Linked);
    }

    pub(crate) fn add_dependency(&self, key: &str, dep_key: &str) {
        if let Some(record) = self.records.borrow_mut().get_mut(key)
            && !record.dependencies.iter().any(|d| d == dep_key)
        {
            record.dependencies.push(dep_key.to_string());
        }
    }

    pub(crate) fn add_dependent(&self, key: &str, dependent: &str) {
        if let Some(record) = self.records.borrow_mut().get_mut(key) {
            record.dependents.insert(dependent.to_string());
        }
    }

    pub(crate) fn complete(&self, key: &str, presentation: Presentation) {
        if let Some(record) = self.records.borrow_mut().get_mut(key) {
            record.presentation = Some(presentation);
        }
        self.transition(key, ModuleState::Evaluated);
    }

    pub(crate) fn fail(&self, key: &str, error: &LoadError) {
        if let Some(record) = self.records.borrow_mut().get_mut(key) {
            record.error = Some(error.clone());
        }
        self.transition(key, ModuleState::Failed);
    }

    /// Cache a prebuilt namespace (a virtual module) as an Evaluated record.
    pub(crate) fn insert_evaluated(&self, key: &str, namespace: NamespaceRef) -> Presentation {
        trace!(key, "virtual module cached");
        let mut record = ModuleRecord::new();
        record.namespace = namespace.clone();
        record.state = ModuleState::Evaluated;
        let presentation = Presentation::Namespace(namespace);
        record.presentation = Some(presentation.clone());
        self.records.borrow_mut().insert(key.to_string(), record);
        presentation
    }

    fn transition(&self, key: &str, to: ModuleState) {
        if let Some(record) = self.records.borrow_mut().get_mut(key) {
            trace!(key, from = ?record.state, to = ?to, "module state");
            record.state = to;
        }
    }
}
