//! Cache entries and freshness classification results.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Freshness verdict for a domain at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// No entry, or the entry is older than the stale window.
    Missing,
    /// Serve as-is, no load needed.
    Fresh,
    /// Serve immediately, revalidate in the background.
    Stale,
}

impl Freshness {
    pub fn is_missing(self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Missing => "missing",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
        };
        f.write_str(label)
    }
}

/// Immutable snapshot of a domain's value.
///
/// Entries are replaced wholesale, never edited in place. The value sits
/// behind an `Arc` so replacing only the stale marker does not copy it.
#[derive(Debug)]
pub struct CacheEntry<T> {
    value: Arc<T>,
    fetched_at: DateTime<Utc>,
    explicitly_stale: bool,
}

// Manual Clone so T itself need not be Clone
impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            fetched_at: self.fetched_at,
            explicitly_stale: self.explicitly_stale,
        }
    }
}

impl<T> CacheEntry<T> {
    /// A freshly loaded (or optimistically produced) entry.
    pub fn loaded(value: T, fetched_at: DateTime<Utc>) -> Self {
        Self::from_shared(Arc::new(value), fetched_at)
    }

    pub(crate) fn from_shared(value: Arc<T>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value,
            fetched_at,
            explicitly_stale: false,
        }
    }

    /// The same value and timestamp with the invalidation marker set.
    #[must_use]
    pub fn invalidated(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            fetched_at: self.fetched_at,
            explicitly_stale: true,
        }
    }

    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn is_explicitly_stale(&self) -> bool {
        self.explicitly_stale
    }
}

impl<T: PartialEq> PartialEq for CacheEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.fetched_at == other.fetched_at
            && self.explicitly_stale == other.explicitly_stale
            && *self.value == *other.value
    }
}

/// What a consumer sees when it reads a domain.
#[derive(Debug)]
pub struct Snapshot<T> {
    pub freshness: Freshness,
    /// `None` when the domain classified as missing and nothing was loaded.
    pub value: Option<Arc<T>>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            freshness: self.freshness,
            value: self.value.clone(),
        }
    }
}

impl<T> Snapshot<T> {
    pub(crate) fn new(freshness: Freshness, value: Option<Arc<T>>) -> Self {
        Self { freshness, value }
    }
}
