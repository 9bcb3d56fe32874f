//! Virtual / built-in modules.
//!
//! A virtual module is a name mapped directly to a prebuilt namespace,
//! bypassing the resolver and reader entirely. The table is consulted before
//! resolution; on first use the namespace is cached into the registry under
//! the name, which is why redefining an already-used name has no retroactive
//! effect. Registering a name after it has already been reached through
//! normal resolution does not shadow the cached module: registration timing
//! relative to first use is an invariant the caller must respect.

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use stoat_core::{NamespaceRef, Value};

/// Name-to-namespace table for host-provided modules.
#[derive(Default)]
pub struct VirtualModules {
    map: RefCell<FxHashMap<String, NamespaceRef>>,
}

impl VirtualModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a namespace from `exports` (order preserved) and store it under
    /// `name`, replacing any previous definition. Returns the namespace.
    pub fn define(
        &self,
        name: impl Into<String>,
        exports: impl IntoIterator<Item = (String, Value)>,
    ) -> NamespaceRef {
        let namespace = NamespaceRef::from_entries(exports);
        self.define_namespace(name, namespace.clone());
        namespace
    }

    /// Store an existing namespace under `name`.
    pub fn define_namespace(&self, name: impl Into<String>, namespace: NamespaceRef) {
        self.map.borrow_mut().insert(name.into(), namespace);
    }

    pub fn get(&self, name: &str) -> Option<NamespaceRef> {
        self.map.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }
}
