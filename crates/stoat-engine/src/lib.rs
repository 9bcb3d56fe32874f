//! stoat-engine - module resolution, loading, and registry.
//!
//! This crate turns a specifier string into a linked, cached, interop-correct
//! module value:
//!
//! - [`resolver`]: specifier → canonical key, with search-extension probing
//! - [`reader`]: canonical key → source text, through the per-extension
//!   compiler map
//! - [`registry`]: the per-context record arena with cycle handling
//! - [`builtins`]: virtual modules that bypass resolution entirely
//! - [`context`]: the [`LoaderContext`] entry points and module scope
//!
//! The actual compiler/executor is an external collaborator behind
//! [`ModuleCompiler`]; the engine owns everything between a specifier and
//! that collaborator, plus the cache of what came back.
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use stoat_engine::{LoaderConfig, LoaderContext, ModuleCompiler};
//!
//! fn build(compiler: Rc<dyn ModuleCompiler>) -> LoaderContext {
//!     let mut config = LoaderConfig::default();
//!     config.search_extensions = vec![".js".to_string()];
//!     LoaderContext::new(config, compiler)
//! }
//! ```

pub mod builtins;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod reader;
pub mod registry;
pub mod resolver;

pub use builtins::VirtualModules;
pub use compiler::{CompiledUnit, ModuleBody, ModuleCompiler};
pub use config::LoaderConfig;
pub use context::{DynamicImport, LoaderContext, ModuleScope};
pub use error::{HostError, LoadError, LoadResult};
pub use reader::{CompilerMap, DefaultReader, ReadSource, TransformError, TransformFn};
pub use registry::{ModuleState, Presentation, Registry};
pub use resolver::{DefaultResolver, Resolve, ResolveOptions, search_with_extensions};
