//! Source reading and the per-extension compiler map.
//!
//! The reader turns a canonical key into executable source text. The default
//! reader only understands path-form keys; scheme-form keys need a
//! host-supplied [`ReadSource`] override. After the raw text is obtained, the
//! compiler map is consulted by filename extension; this indirection is what
//! lets foreign source formats be imported as if they were native modules.

use crate::error::{HostError, LoadError, LoadResult};
use rustc_hash::FxHashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;

/// A source-to-source transform registered for one filename extension.
/// Receives `(canonical_key, raw_text)` and returns the executable source.
pub type TransformFn = Rc<dyn Fn(&str, &str) -> Result<String, HostError>>;

/// Errors from the compiler map.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// No transform is registered for the extension. Only surfaced through
    /// [`CompilerMap::expect_transform`]; plain lookup passes raw text through.
    #[error("no compiler registered for extension '{0}'")]
    Missing(String),

    #[error("compiler for extension '{ext}' failed")]
    Failed {
        ext: String,
        #[source]
        cause: Arc<dyn std::error::Error + Send + Sync>,
    },
}

/// Strategy map from filename extension (with leading dot) to transform.
///
/// Registration adds or overwrites (last writer wins) and never removes
/// existing entries.
#[derive(Default)]
pub struct CompilerMap {
    map: FxHashMap<String, TransformFn>,
}

impl CompilerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transform` for `ext` (e.g. `".js"`), replacing any previous
    /// entry for the same extension.
    pub fn register(
        &mut self,
        ext: impl Into<String>,
        transform: impl Fn(&str, &str) -> Result<String, HostError> + 'static,
    ) {
        self.map.insert(ext.into(), Rc::new(transform));
    }

    pub fn contains(&self, ext: &str) -> bool {
        self.map.contains_key(ext)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The transform for `ext`, or the typed missing-entry error. For hosts
    /// that mandate a registered compiler for an extension.
    pub fn expect_transform(&self, ext: &str) -> Result<&TransformFn, TransformError> {
        self.map
            .get(ext)
            .ok_or_else(|| TransformError::Missing(ext.to_string()))
    }

    /// Apply the transform registered for `ext` to `raw`, or pass `raw`
    /// through unmodified when no entry exists.
    pub fn transform(&self, key: &str, ext: &str, raw: String) -> Result<String, TransformError> {
        match self.map.get(ext) {
            Some(transform) => transform(key, &raw).map_err(|e| TransformError::Failed {
                ext: ext.to_string(),
                cause: Arc::from(e),
            }),
            None => Ok(raw),
        }
    }
}

/// A canonical-key-to-source mapping. Replaceable per context via
/// [`crate::config::LoaderConfig::reader`].
pub trait ReadSource {
    fn read(&self, key: &str, compilers: &CompilerMap) -> LoadResult<String>;
}

impl<F> ReadSource for F
where
    F: Fn(&str, &CompilerMap) -> LoadResult<String>,
{
    fn read(&self, key: &str, compilers: &CompilerMap) -> LoadResult<String> {
        self(key, compilers)
    }
}

/// The built-in reader: path-form keys only, BOM and shebang stripped,
/// compiler map applied by extension.
#[derive(Debug, Default)]
pub struct DefaultReader;

impl ReadSource for DefaultReader {
    fn read(&self, key: &str, compilers: &CompilerMap) -> LoadResult<String> {
        if key.contains(':') {
            return Err(LoadError::read(
                key,
                "scheme-form keys require a host-supplied reader",
            ));
        }

        let raw = fs::read_to_string(key).map_err(|e| LoadError::read(key, e))?;
        let raw = strip_shebang(strip_bom(&raw));

        match key_extension(key) {
            Some(ext) => compilers
                .transform(key, &ext, raw)
                .map_err(|e| LoadError::read(key, e)),
            None => Ok(raw),
        }
    }
}

/// Extension of a key's final path component, with the leading dot.
pub fn key_extension(key: &str) -> Option<String> {
    Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
}

/// Strip the UTF-8 byte order mark if present.
fn strip_bom(source: &str) -> &str {
    source.strip_prefix('\u{feff}').unwrap_or(source)
}

/// Strip a shebang line if present.
///
/// The line is replaced with spaces to preserve line numbers in diagnostics.
fn strip_shebang(source: &str) -> String {
    if source.starts_with("#!") {
        if let Some(newline_pos) = source.find('\n') {
            format!("{}{}", " ".repeat(newline_pos), &source[newline_pos..])
        } else {
            String::new()
        }
    } else {
        source.to_string()
    }
}
