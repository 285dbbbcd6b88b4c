//! Error taxonomy for the cache engine.
//!
//! Serving stale data is never an error. Only two things can go wrong at the
//! engine boundary: a loader rejects (`LoadError`) or a freshness policy is
//! configured with its windows inverted (`ConfigurationError`).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Why a loader call did not produce a value.
#[derive(Debug, Clone)]
pub enum LoadFailure {
    /// The loader returned an error.
    Rejected(Arc<anyhow::Error>),
    /// The loader task panicked or was aborted by the runtime.
    Aborted(String),
}

impl std::fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(err) => write!(f, "{:#}", err),
            Self::Aborted(reason) => write!(f, "loader task aborted: {}", reason),
        }
    }
}

/// A loader call for one domain failed.
///
/// Cloneable so that every caller joined on the same flight receives it.
#[derive(Debug, Clone, Error)]
#[error("loading domain '{domain}' failed: {failure}")]
pub struct LoadError {
    pub domain: String,
    pub failure: LoadFailure,
}

impl LoadError {
    pub fn rejected(domain: impl Into<String>, err: anyhow::Error) -> Self {
        Self {
            domain: domain.into(),
            failure: LoadFailure::Rejected(Arc::new(err)),
        }
    }

    pub fn aborted(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            failure: LoadFailure::Aborted(reason.into()),
        }
    }
}

/// Invalid configuration, detected when a policy or settings are built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("fresh window {fresh:?} exceeds stale window {stale:?}{}", domain_suffix(.domain))]
    InvertedWindows {
        domain: Option<String>,
        fresh: Duration,
        stale: Duration,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

impl ConfigurationError {
    /// Attach the domain name to an inverted-windows error.
    pub fn for_domain(self, name: &str) -> Self {
        match self {
            Self::InvertedWindows { fresh, stale, .. } => Self::InvertedWindows {
                domain: Some(name.to_string()),
                fresh,
                stale,
            },
            other => other,
        }
    }
}

fn domain_suffix(domain: &Option<String>) -> String {
    match domain {
        Some(name) => format!(" for domain '{}'", name),
        None => String::new(),
    }
}

/// Errors surfaced by the registry and consumer bindings.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("cache domain '{0}' is not defined")]
    UnknownDomain(String),

    #[error("cache domain '{name}' holds {actual}, requested {requested}")]
    TypeMismatch {
        name: String,
        requested: &'static str,
        actual: &'static str,
    },
}

pub type CacheResult<T> = Result<T, CacheError>;
