//! A single named cache domain.
//!
//! A domain owns at most one [`CacheEntry`], the in-flight slot of its
//! loader and its subscriber list. The entry has exactly three writers:
//! loader-success installation, optimistic mutation and invalidation.
//! Nothing else in the crate replaces it.

use std::any::type_name;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::clock::Clock;
use super::entry::{CacheEntry, Freshness, Snapshot};
use super::flight::{Acquired, FlightOutcome, FlightRelease, SharedFlight, SingleFlightGuard};
use super::loader::Loader;
use super::policy::FreshnessPolicy;
use super::stats::CacheStats;
use super::subscriber::{ChangeCause, Notification, SubscriptionId, Subscribers};
use crate::error::LoadError;

/// Bounds for values stored in a domain.
///
/// Equality is structural: a reload equal to the cached value does not
/// notify subscribers.
pub trait DomainValue: PartialEq + Send + Sync + 'static {}

impl<T: PartialEq + Send + Sync + 'static> DomainValue for T {}

/// Outcome of applying one optimistic transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The entry was replaced and subscribers were told.
    Applied,
    /// The entry was replaced with an equal value; nobody was notified.
    Unchanged,
    /// The domain has no entry to transform.
    Skipped,
}

pub struct CacheDomain<T> {
    name: Arc<str>,
    policy: FreshnessPolicy,
    loader: Arc<dyn Loader<T>>,
    clock: Arc<dyn Clock>,
    stats: Arc<CacheStats>,
    entry: Mutex<Option<CacheEntry<T>>>,
    flight: SingleFlightGuard<T>,
    subscribers: Subscribers<T>,
}

impl<T: DomainValue> CacheDomain<T> {
    pub(crate) fn new(
        name: Arc<str>,
        policy: FreshnessPolicy,
        loader: Arc<dyn Loader<T>>,
        clock: Arc<dyn Clock>,
        stats: Arc<CacheStats>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            policy,
            loader,
            clock,
            stats,
            entry: Mutex::new(None),
            flight: SingleFlightGuard::new(),
            subscribers: Subscribers::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }

    /// Copy of the current entry, if any.
    pub fn entry(&self) -> Option<CacheEntry<T>> {
        self.entry.lock().clone()
    }

    /// `now()` of the registry clock this domain was created with.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn classify(&self, now: DateTime<Utc>) -> Freshness {
        self.policy.classify(self.entry.lock().as_ref(), now)
    }

    /// Whether a loader call is outstanding.
    pub fn is_loading(&self) -> bool {
        self.flight.is_in_flight()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Classify without triggering any load.
    ///
    /// A missing domain yields no value, even when an entry older than the
    /// stale window still exists.
    pub fn peek_at(&self, now: DateTime<Utc>) -> Snapshot<T> {
        let entry = self.entry.lock();
        let freshness = self.policy.classify(entry.as_ref(), now);
        let value = match freshness {
            Freshness::Missing => None,
            Freshness::Fresh | Freshness::Stale => entry.as_ref().map(|e| Arc::clone(e.value())),
        };
        Snapshot::new(freshness, value)
    }

    pub fn peek(&self) -> Snapshot<T> {
        self.peek_at(self.clock.now())
    }

    /// Stale-while-revalidate read.
    ///
    /// - fresh: cached value, no load
    /// - stale: cached value now, background load unless one is running
    /// - missing: await the running load or start one; errors are returned
    ///
    /// The snapshot carries the classification observed at `now`.
    pub async fn read_at(self: &Arc<Self>, now: DateTime<Utc>) -> Result<Snapshot<T>, LoadError> {
        let (freshness, cached) = {
            let entry = self.entry.lock();
            let freshness = self.policy.classify(entry.as_ref(), now);
            (freshness, entry.as_ref().map(|e| Arc::clone(e.value())))
        };

        match freshness {
            Freshness::Fresh => {
                self.stats.record_fresh_hit();
                Ok(Snapshot::new(freshness, cached))
            }
            Freshness::Stale => {
                self.stats.record_stale_serve();
                self.revalidate_in_background();
                Ok(Snapshot::new(freshness, cached))
            }
            Freshness::Missing => {
                self.stats.record_miss();
                let value = self.load_blocking().await?;
                Ok(Snapshot::new(freshness, Some(value)))
            }
        }
    }

    pub async fn read(self: &Arc<Self>) -> Result<Snapshot<T>, LoadError> {
        self.read_at(self.clock.now()).await
    }

    /// Load regardless of classification and wait for the result.
    pub async fn refresh(self: &Arc<Self>) -> Result<Arc<T>, LoadError> {
        self.load_blocking().await
    }

    /// Wait for the outstanding load, if any.
    pub async fn settle(&self) -> Option<Result<Arc<T>, LoadError>> {
        let flight = self.flight.current()?;
        Some(flight.await)
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification<T>) + Send + Sync + 'static,
    {
        let id = self.subscribers.add(Arc::new(callback));
        debug!("Subscribed {} to cache domain {}", id, self.name);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    fn revalidate_in_background(self: &Arc<Self>) {
        if self.begin_flight(true).already_in_flight() {
            debug!("Revalidation of {} already in flight", self.name);
        }
    }

    async fn load_blocking(self: &Arc<Self>) -> Result<Arc<T>, LoadError> {
        let acquired = self.begin_flight(false);
        if let Acquired::AlreadyInFlight { background, .. } = &acquired {
            self.stats.record_load_joined();
            debug!(
                "Joining in-flight load of {} (started in background: {})",
                self.name, background
            );
        }
        acquired.into_shared().await
    }

    fn begin_flight(self: &Arc<Self>, background: bool) -> Acquired<T> {
        self.flight.acquire(background, |release| {
            self.stats.record_load_started();
            debug!("Loading cache domain {} (background: {})", self.name, background);
            self.spawn_load(release, background)
        })
    }

    /// Run the loader on its own task so a deactivated consumer never cancels it.
    fn spawn_load(self: &Arc<Self>, release: FlightRelease<T>, background: bool) -> SharedFlight<T> {
        let domain = Arc::clone(self);
        let handle = tokio::spawn(async move { domain.run_load(release, background).await });

        let name = Arc::clone(&self.name);
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(LoadError::aborted(&*name, join_err.to_string())),
            }
        }
        .boxed()
        .shared()
    }

    async fn run_load(self: Arc<Self>, release: FlightRelease<T>, background: bool) -> FlightOutcome<T> {
        let result = self.loader.load(&self.name).await;

        match result {
            Ok(value) => {
                let (value, notification) = self.install(Arc::new(value));
                release.release();
                if let Some(notification) = notification {
                    self.subscribers.notify(&notification);
                }
                Ok(value)
            }
            Err(err) => {
                release.release();
                self.stats.record_load_failure(background);
                let err = LoadError::rejected(&*self.name, err);
                if background {
                    warn!("Background revalidation failed: {}", err);
                } else {
                    debug!("Blocking load failed: {}", err);
                }
                Err(err)
            }
        }
    }

    /// Loader-success writer. Always supersedes the current entry, including
    /// unacknowledged optimistic data.
    fn install(&self, value: Arc<T>) -> (Arc<T>, Option<Notification<T>>) {
        let now = self.clock.now();
        let mut entry = self.entry.lock();

        let unchanged = entry
            .as_ref()
            .filter(|current| **current.value() == *value)
            .map(|current| Arc::clone(current.value()));

        let installed = unchanged.clone().unwrap_or(value);
        *entry = Some(CacheEntry::from_shared(Arc::clone(&installed), now));
        drop(entry);

        if unchanged.is_some() {
            debug!("Reload of {} matches cached value, not notifying", self.name);
            return (installed, None);
        }

        let notification = self.notification(ChangeCause::Loaded, Freshness::Fresh, &installed);
        (installed, Some(notification))
    }

    /// Optimistic writer. The transform may run more than once if a load
    /// lands while it is computing, so it must be pure.
    pub(crate) fn apply_mutation<F>(&self, transform: F) -> MutationOutcome
    where
        F: Fn(&T) -> T,
    {
        loop {
            let Some(base) = self.entry.lock().as_ref().map(|e| Arc::clone(e.value())) else {
                debug!("Optimistic mutation skipped for empty domain {}", self.name);
                return MutationOutcome::Skipped;
            };

            let next = transform(&base);
            let changed = next != *base;

            let now = self.clock.now();
            let mut entry = self.entry.lock();
            let still_current = entry
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current.value(), &base));
            if !still_current {
                continue;
            }

            // an optimistic write also clears the invalidation marker
            let value = Arc::new(next);
            *entry = Some(CacheEntry::from_shared(Arc::clone(&value), now));
            drop(entry);

            self.stats.record_mutation();
            if !changed {
                return MutationOutcome::Unchanged;
            }

            let notification = self.notification(ChangeCause::Mutated, Freshness::Fresh, &value);
            self.subscribers.notify(&notification);
            return MutationOutcome::Applied;
        }
    }

    /// Invalidation writer. Keeps the value so the next read serves it stale.
    /// Returns `false` when there is no entry to mark.
    pub(crate) fn mark_stale(&self) -> bool {
        let mut entry = self.entry.lock();
        let Some(current) = entry.as_ref() else {
            return false;
        };

        if current.is_explicitly_stale() {
            return true;
        }

        let next = current.invalidated();
        let value = Arc::clone(next.value());
        *entry = Some(next);
        drop(entry);

        self.stats.record_invalidation();
        debug!("Invalidated cache domain {}", self.name);

        let notification = self.notification(ChangeCause::Invalidated, Freshness::Stale, &value);
        self.subscribers.notify(&notification);
        true
    }

    fn notification(&self, cause: ChangeCause, freshness: Freshness, value: &Arc<T>) -> Notification<T> {
        Notification {
            domain: Arc::clone(&self.name),
            cause,
            freshness,
            value: Arc::clone(value),
        }
    }
}

impl<T> std::fmt::Debug for CacheDomain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDomain")
            .field("name", &self.name)
            .field("value_type", &type_name::<T>())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Type-erased view used by the registry for name-only operations.
pub(crate) trait ErasedDomain: Send + Sync {
    fn value_type(&self) -> &'static str;
    fn invalidate(&self) -> bool;
    fn freshness(&self) -> Freshness;
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

impl<T: DomainValue> ErasedDomain for CacheDomain<T> {
    fn value_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn invalidate(&self) -> bool {
        self.mark_stale()
    }

    fn freshness(&self) -> Freshness {
        self.classify(self.clock.now())
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::loader::loader_fn;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn domain_with(
        clock: &ManualClock,
        server: Arc<AtomicU32>,
        calls: Arc<AtomicUsize>,
    ) -> Arc<CacheDomain<u32>> {
        let loader = loader_fn(move |_: &str| {
            let server = Arc::clone(&server);
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(server.load(Ordering::SeqCst))
            }
        });
        CacheDomain::new(
            Arc::from("today-totals"),
            FreshnessPolicy::from_millis(5_000, 30_000).unwrap(),
            Arc::new(loader),
            Arc::new(clock.clone()),
            Arc::new(CacheStats::new()),
        )
    }

    #[tokio::test]
    async fn test_fresh_read_does_not_load() {
        let clock = ManualClock::at_epoch();
        let calls = Arc::new(AtomicUsize::new(0));
        let domain = domain_with(&clock, Arc::new(AtomicU32::new(500)), Arc::clone(&calls));

        let first = domain.read().await.unwrap();
        assert_eq!(first.freshness, Freshness::Missing);
        assert_eq!(*first.value.unwrap(), 500);

        clock.advance_millis(4_000);
        let second = domain.read().await.unwrap();
        assert_eq!(second.freshness, Freshness::Fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_read_serves_then_revalidates() {
        let clock = ManualClock::at_epoch();
        let server = Arc::new(AtomicU32::new(500));
        let calls = Arc::new(AtomicUsize::new(0));
        let domain = domain_with(&clock, Arc::clone(&server), Arc::clone(&calls));

        domain.read().await.unwrap();
        server.store(650, Ordering::SeqCst);
        clock.advance_millis(10_000);

        let stale = domain.read().await.unwrap();
        assert_eq!(stale.freshness, Freshness::Stale);
        assert_eq!(*stale.value.unwrap(), 500);

        let reloaded = domain.settle().await.unwrap().unwrap();
        assert_eq!(*reloaded, 650);
        assert_eq!(domain.peek().freshness, Freshness::Fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_equal_reload_keeps_value_and_skips_notification() {
        let clock = ManualClock::at_epoch();
        let domain = domain_with(&clock, Arc::new(AtomicU32::new(500)), Arc::new(AtomicUsize::new(0)));
        let first = domain.refresh().await.unwrap();

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        domain.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        clock.advance_millis(1_000);
        let second = domain.refresh().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(domain.entry().unwrap().fetched_at(), clock.now());
    }

    #[tokio::test]
    async fn test_mutation_on_empty_domain_is_skipped() {
        let clock = ManualClock::at_epoch();
        let domain = domain_with(&clock, Arc::new(AtomicU32::new(0)), Arc::new(AtomicUsize::new(0)));
        assert_eq!(domain.apply_mutation(|v| v + 1), MutationOutcome::Skipped);
        assert!(domain.entry().is_none());
    }

    #[tokio::test]
    async fn test_mark_stale_keeps_value() {
        let clock = ManualClock::at_epoch();
        let domain = domain_with(&clock, Arc::new(AtomicU32::new(42)), Arc::new(AtomicUsize::new(0)));
        assert!(!domain.mark_stale());

        domain.refresh().await.unwrap();
        assert!(domain.mark_stale());

        let snap = domain.peek();
        assert_eq!(snap.freshness, Freshness::Stale);
        assert_eq!(*snap.value.unwrap(), 42);
    }
}
