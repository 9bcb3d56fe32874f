//! The external compiler/executor collaborator.
//!
//! The engine never parses or executes source text itself. A host supplies a
//! [`ModuleCompiler`]; compilation yields a [`CompiledUnit`] whose static
//! dependency list drives linking and whose body closure is run exactly once,
//! against a [`ModuleScope`](crate::context::ModuleScope), to populate the
//! module's exports.

use crate::context::ModuleScope;
use crate::error::HostError;
use std::fmt;
use std::rc::Rc;

/// A compiled module body. Runs to completion on the context's thread; any
/// error it returns becomes the module's evaluation failure.
pub type ModuleBody = Rc<dyn Fn(&ModuleScope<'_>) -> Result<(), HostError>>;

/// The executable form of one module, owned by the compiler that produced it.
#[derive(Clone)]
pub struct CompiledUnit {
    /// Static dependency specifiers in declaration order. The registry
    /// requests them in exactly this order before the body runs.
    pub dependencies: Vec<String>,
    pub body: ModuleBody,
}

impl fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Compiles source text into an executable unit.
///
/// `module_goal` distinguishes import-style requests from require-style ones
/// for compilers whose grammar differs between the two; the unit is compiled
/// once, on first request, under the goal of that first request.
pub trait ModuleCompiler {
    fn compile(
        &self,
        key: &str,
        source: &str,
        module_goal: bool,
    ) -> Result<CompiledUnit, HostError>;
}
