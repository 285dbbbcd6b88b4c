//! Optimistic mutation across several domains.
//!
//! One user action ("480 kcal lunch logged") may move several aggregates at
//! once. Each domain gets its own pure transform; nothing is shared between
//! them. Every target is resolved before any transform is applied, so a bad
//! name or type leaves all domains untouched.

use serde::Serialize;
use tracing::debug;

use super::domain::{DomainValue, MutationOutcome};
use super::registry::CacheRegistry;
use crate::error::{CacheError, CacheResult};

type Step<'r> = Box<dyn FnOnce() -> MutationOutcome + 'r>;

/// Builder collecting per-domain transforms, applied by [`commit`](Self::commit).
#[must_use = "a mutation batch does nothing until committed"]
pub struct MutationBatch<'r> {
    registry: &'r CacheRegistry,
    steps: Vec<(String, Step<'r>)>,
    error: Option<CacheError>,
}

/// Which domains a mutation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationReport {
    /// Replaced with a different value; subscribers notified.
    pub applied: Vec<String>,
    /// Transform returned an equal value.
    pub unchanged: Vec<String>,
    /// No entry yet; nothing to transform.
    pub skipped: Vec<String>,
}

impl MutationReport {
    fn record(&mut self, domain: String, outcome: MutationOutcome) {
        match outcome {
            MutationOutcome::Applied => self.applied.push(domain),
            MutationOutcome::Unchanged => self.unchanged.push(domain),
            MutationOutcome::Skipped => self.skipped.push(domain),
        }
    }
}

impl<'r> MutationBatch<'r> {
    pub(crate) fn new(registry: &'r CacheRegistry) -> Self {
        Self {
            registry,
            steps: Vec::new(),
            error: None,
        }
    }

    /// Queue a transform for `domain`.
    pub fn apply<T, F>(mut self, domain: &str, transform: F) -> Self
    where
        T: DomainValue,
        F: Fn(&T) -> T + 'r,
    {
        if self.error.is_some() {
            return self;
        }

        match self.registry.domain::<T>(domain) {
            Ok(handle) => {
                let step: Step<'r> = Box::new(move || handle.apply_mutation(transform));
                self.steps.push((domain.to_string(), step));
            }
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Apply every queued transform, or none if any target failed to resolve.
    pub fn commit(self) -> CacheResult<MutationReport> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut report = MutationReport::default();
        for (domain, step) in self.steps {
            report.record(domain, step());
        }

        debug!(
            "Optimistic mutation: applied={:?} unchanged={:?} skipped={:?}",
            report.applied, report.unchanged, report.skipped
        );
        Ok(report)
    }
}
