//! Error types for stoat-engine.
//!
//! Every variant wraps its underlying cause as a chained `#[source]` so
//! diagnostic tooling can walk the full chain; nothing is flattened into a
//! message string. Causes are `Arc`-backed, which makes `LoadError` cheap to
//! clone, so a Failed registry record re-raises its original error by value.

use std::sync::Arc;
use thiserror::Error;

pub use stoat_core::HostError;

/// Shared, chained error cause.
pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// Errors produced by the module loading pipeline.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The specifier could not be mapped to a canonical key, including
    /// search-extension exhaustion.
    #[error("cannot resolve '{specifier}' from '{referrer}'")]
    Resolution {
        specifier: String,
        referrer: String,
        #[source]
        cause: Cause,
    },

    /// The canonical key resolved but its content could not be obtained.
    #[error("cannot read module '{key}'")]
    Read {
        key: String,
        #[source]
        cause: Cause,
    },

    /// The module's source text failed to compile.
    #[error("failed to compile module '{key}'")]
    Compile {
        key: String,
        #[source]
        cause: Cause,
    },

    /// The module body threw during execution. The body's own error is the
    /// unmodified cause.
    #[error("error evaluating module '{key}'")]
    Evaluation {
        key: String,
        #[source]
        cause: Cause,
    },
}

impl LoadError {
    pub fn resolution(
        specifier: impl Into<String>,
        referrer: Option<&str>,
        cause: impl Into<HostError>,
    ) -> Self {
        Self::Resolution {
            specifier: specifier.into(),
            referrer: referrer.unwrap_or("<none>").to_string(),
            cause: Arc::from(cause.into()),
        }
    }

    pub fn read(key: impl Into<String>, cause: impl Into<HostError>) -> Self {
        Self::Read {
            key: key.into(),
            cause: Arc::from(cause.into()),
        }
    }

    pub fn compile(key: impl Into<String>, cause: impl Into<HostError>) -> Self {
        Self::Compile {
            key: key.into(),
            cause: Arc::from(cause.into()),
        }
    }

    pub fn evaluation(key: impl Into<String>, cause: impl Into<HostError>) -> Self {
        Self::Evaluation {
            key: key.into(),
            cause: Arc::from(cause.into()),
        }
    }
}

/// Result type using LoadError.
pub type LoadResult<T> = Result<T, LoadError>;
