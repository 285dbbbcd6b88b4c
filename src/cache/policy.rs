//! Freshness policy.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::entry::{CacheEntry, Freshness};
use crate::error::ConfigurationError;

/// Per-domain rule deciding whether an entry is fresh, stale or missing.
///
/// Invariant: `fresh_window <= stale_window`. Constructors validate it; the
/// builder setters re-validate in [`FreshnessPolicy::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// Entries younger than this are served without any load.
    fresh_window: Duration,

    /// Entries at least this old are treated as absent and block on a reload.
    stale_window: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            fresh_window: Duration::from_secs(30),
            stale_window: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl FreshnessPolicy {
    /// Create a policy, rejecting a fresh window longer than the stale window.
    pub fn new(fresh_window: Duration, stale_window: Duration) -> Result<Self, ConfigurationError> {
        Self {
            fresh_window,
            stale_window,
        }
        .validate()
    }

    /// Shorthand for millisecond windows.
    pub fn from_millis(fresh_ms: u64, stale_ms: u64) -> Result<Self, ConfigurationError> {
        Self::new(Duration::from_millis(fresh_ms), Duration::from_millis(stale_ms))
    }

    /// Set the fresh window (builder pattern). Call [`validate`](Self::validate) afterwards.
    #[must_use]
    pub fn fresh_window(mut self, window: Duration) -> Self {
        self.fresh_window = window;
        self
    }

    /// Set the stale window (builder pattern). Call [`validate`](Self::validate) afterwards.
    #[must_use]
    pub fn stale_window(mut self, window: Duration) -> Self {
        self.stale_window = window;
        self
    }

    /// Check the window ordering invariant.
    pub fn validate(self) -> Result<Self, ConfigurationError> {
        if self.fresh_window > self.stale_window {
            return Err(ConfigurationError::InvertedWindows {
                domain: None,
                fresh: self.fresh_window,
                stale: self.stale_window,
            });
        }
        Ok(self)
    }

    pub fn fresh(&self) -> Duration {
        self.fresh_window
    }

    pub fn stale(&self) -> Duration {
        self.stale_window
    }

    /// Running totals for the current day (dashboard, hydration).
    /// Short windows because every logged meal moves them.
    pub fn live_totals() -> Self {
        Self {
            fresh_window: Duration::from_secs(5),
            stale_window: Duration::from_secs(30),
        }
    }

    /// Data that rarely changes within a session (weight history, goals).
    pub fn slow_moving() -> Self {
        Self {
            fresh_window: Duration::from_secs(300),
            stale_window: Duration::from_secs(3600), // 1 hour
        }
    }

    /// Classify an entry at `now`.
    ///
    /// Explicit invalidation always wins over age. Negative age (the clock
    /// went backwards) counts as fresh.
    pub fn classify<T>(&self, entry: Option<&CacheEntry<T>>, now: DateTime<Utc>) -> Freshness {
        let Some(entry) = entry else {
            return Freshness::Missing;
        };

        if entry.is_explicitly_stale() {
            return Freshness::Stale;
        }

        let age = match now.signed_duration_since(entry.fetched_at()).to_std() {
            Ok(age) => age,
            // clock skew
            Err(_) => return Freshness::Fresh,
        };

        if age < self.fresh_window {
            Freshness::Fresh
        } else if age < self.stale_window {
            Freshness::Stale
        } else {
            Freshness::Missing
        }
    }
}
