//! Cache statistics tracking.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Registry-wide counters, shared by every domain.
#[derive(Debug, Default)]
pub struct CacheStats {
    fresh_hits: AtomicU64,
    stale_serves: AtomicU64,
    misses: AtomicU64,
    loads_started: AtomicU64,
    loads_joined: AtomicU64,
    load_failures: AtomicU64,
    background_failures: AtomicU64,
    mutations: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub fresh_hits: u64,
    pub stale_serves: u64,
    pub misses: u64,
    pub loads_started: u64,
    pub loads_joined: u64,
    pub load_failures: u64,
    pub background_failures: u64,
    pub mutations: u64,
    pub invalidations: u64,
}

impl StatsSnapshot {
    /// Share of reads answered from cache without blocking (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let served = self.fresh_hits + self.stale_serves;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fresh_hit(&self) {
        self.fresh_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_serve(&self) {
        self.stale_serves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_started(&self) {
        self.loads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_joined(&self) {
        self.loads_joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_failure(&self, background: bool) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
        if background {
            self.background_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            stale_serves: self.stale_serves.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads_started: self.loads_started.load(Ordering::Relaxed),
            loads_joined: self.loads_joined.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            background_failures: self.background_failures.load(Ordering::Relaxed),
            mutations: self.mutations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
