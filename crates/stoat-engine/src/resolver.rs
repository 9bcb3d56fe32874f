//! Specifier resolution.
//!
//! A specifier becomes a canonical key in one of three ways:
//! - scheme-form specifiers (containing `:`) pass through verbatim and are
//!   never filesystem-resolved;
//! - bare names (no leading `.`) pass through verbatim; they are resolved at
//!   lookup time against the virtual module table or by a host resolver;
//! - relative specifiers are joined against the referrer's directory and
//!   canonicalized (symlink-resolved), probing the configured search
//!   extensions when no literal file matches.
//!
//! A replacement resolver installed by the host does NOT inherit
//! search-extension probing automatically; [`search_with_extensions`] is the
//! composable helper a replacement can opt into.

use crate::error::{LoadError, LoadResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Per-call inputs the resolver draws from [`crate::config::LoaderConfig`].
pub struct ResolveOptions<'a> {
    /// Base directory used when a relative specifier has no referrer.
    pub base_dir: &'a Path,
    /// Extensions probed, in order, for extensionless specifiers.
    pub search_extensions: &'a [String],
}

/// A specifier-to-canonical-key mapping. Replaceable per context via
/// [`crate::config::LoaderConfig::resolver`].
pub trait Resolve {
    fn resolve(
        &self,
        specifier: &str,
        referrer: Option<&str>,
        opts: &ResolveOptions<'_>,
    ) -> LoadResult<String>;
}

impl<F> Resolve for F
where
    F: Fn(&str, Option<&str>, &ResolveOptions<'_>) -> LoadResult<String>,
{
    fn resolve(
        &self,
        specifier: &str,
        referrer: Option<&str>,
        opts: &ResolveOptions<'_>,
    ) -> LoadResult<String> {
        self(specifier, referrer, opts)
    }
}

/// The built-in resolution algorithm.
#[derive(Debug, Default)]
pub struct DefaultResolver;

impl Resolve for DefaultResolver {
    fn resolve(
        &self,
        specifier: &str,
        referrer: Option<&str>,
        opts: &ResolveOptions<'_>,
    ) -> LoadResult<String> {
        // Scheme-form keys pass through unchanged; re-resolution is identity.
        if specifier.contains(':') {
            return Ok(specifier.to_string());
        }

        // Bare names are for the virtual table or a resolver override.
        if !specifier.starts_with('.') {
            return Ok(specifier.to_string());
        }

        let base = match referrer {
            Some(r) => Path::new(r)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            None => opts.base_dir.to_path_buf(),
        };

        // The referrer directory may itself be relative or contain symlinks.
        let base = fs::canonicalize(&base)
            .map_err(|e| LoadError::resolution(specifier, referrer, e))?;
        let joined = base.join(specifier);

        if joined.is_file() {
            return canonical_key(&joined, specifier, referrer);
        }

        if let Some(found) = search_with_extensions(&joined, opts.search_extensions) {
            return canonical_key(&found, specifier, referrer);
        }

        Err(LoadError::resolution(
            specifier,
            referrer,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "no file at '{}', with any of {} search extension(s), or as an index file",
                    joined.display(),
                    opts.search_extensions.len()
                ),
            ),
        ))
    }
}

/// Probe `path` against `extensions`, in order. For each extension, first
/// `path` with the extension appended, then `path/index` with the extension.
/// Returns the first existing regular file, not yet canonicalized.
///
/// Exposed so replacement resolvers can reuse the built-in probing order.
pub fn search_with_extensions(path: &Path, extensions: &[String]) -> Option<PathBuf> {
    for ext in extensions {
        let mut with_ext = path.as_os_str().to_os_string();
        with_ext.push(ext);
        let candidate = PathBuf::from(with_ext);
        if candidate.is_file() {
            return Some(candidate);
        }

        let index = path.join(format!("index{ext}"));
        if index.is_file() {
            return Some(index);
        }
    }
    None
}

fn canonical_key(path: &Path, specifier: &str, referrer: Option<&str>) -> LoadResult<String> {
    let canonical =
        fs::canonicalize(path).map_err(|e| LoadError::resolution(specifier, referrer, e))?;
    Ok(canonical.display().to_string())
}
