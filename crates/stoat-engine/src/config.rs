//! Loader configuration.
//!
//! All pluggable pieces of the pipeline live on one explicit struct owned by
//! the execution context; there is no process-wide ambient state. Replacing
//! a piece is plain field assignment, and there is no built-in reset once a
//! field is replaced.

use crate::reader::{CompilerMap, DefaultReader, ReadSource};
use crate::resolver::{DefaultResolver, Resolve, ResolveOptions};
use std::path::PathBuf;

/// Per-context loader configuration.
pub struct LoaderConfig {
    /// Base directory for relative specifiers that have no referrer
    /// (typically the entry module).
    pub base_dir: PathBuf,

    /// Specifier resolution. A replacement does not inherit search-extension
    /// probing; see [`crate::resolver::search_with_extensions`].
    pub resolver: Box<dyn Resolve>,

    /// Source reading. The default only understands path-form keys.
    pub reader: Box<dyn ReadSource>,

    /// Per-extension source transforms, applied by the reader.
    pub compilers: CompilerMap,

    /// Extensions probed, in order, when an extensionless relative specifier
    /// does not name a literal file. The order is a documented contract.
    pub search_extensions: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            resolver: Box::new(DefaultResolver),
            reader: Box::new(DefaultReader),
            compilers: CompilerMap::new(),
            search_extensions: Vec::new(),
        }
    }
}

impl LoaderConfig {
    /// The resolver inputs derived from this config.
    pub fn resolve_options(&self) -> ResolveOptions<'_> {
        ResolveOptions {
            base_dir: &self.base_dir,
            search_extensions: &self.search_extensions,
        }
    }
}
