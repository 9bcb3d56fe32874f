//! Module namespace objects.
//!
//! A namespace is the key-ordered exports mapping of one loaded module. The
//! registry hands every consumer the same `NamespaceRef`, so mutations a
//! module body performs after evaluation, and the partial state visible
//! mid-cycle, are observed through ordinary shared-handle semantics rather
//! than any copying or snapshotting.

use crate::value::Value;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Reserved export name for a module's default export.
pub const DEFAULT_EXPORT: &str = "default";

#[derive(Default)]
struct Namespace {
    entries: IndexMap<String, Value>,
}

/// Shared handle to a namespace object. Clones alias the same object;
/// equality for the registry's identity invariants is [`NamespaceRef::ptr_eq`].
#[derive(Clone)]
pub struct NamespaceRef(Rc<RefCell<Namespace>>);

impl NamespaceRef {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Namespace::default())))
    }

    /// Build a namespace from `(name, value)` pairs, preserving their order.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        let ns = Self::new();
        for (name, value) in entries {
            ns.set(name, value);
        }
        ns
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().entries.get(name).cloned()
    }

    /// Insert or overwrite an export. New names append in insertion order.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().entries.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().entries.is_empty()
    }

    /// Export names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().entries.keys().cloned().collect()
    }

    /// Snapshot of the current exports in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The reserved `default` export, if assigned.
    pub fn default_export(&self) -> Option<Value> {
        self.get(DEFAULT_EXPORT)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl Default for NamespaceRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NamespaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({} exports)", self.len())
    }
}
