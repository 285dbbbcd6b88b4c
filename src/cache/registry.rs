//! Cache registry - Central management for all cache domains.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::clock::{Clock, SystemClock};
use super::domain::{CacheDomain, DomainValue, ErasedDomain};
use super::entry::{Freshness, Snapshot};
use super::loader::Loader;
use super::mutation::{MutationBatch, MutationReport};
use super::policy::FreshnessPolicy;
use super::stats::{CacheStats, StatsSnapshot};
use super::subscriber::{Notification, SubscriptionId};
use crate::config::Settings;
use crate::error::{CacheError, CacheResult};

/// Central registry of named cache domains.
///
/// Screens receive a registry instead of reaching for global state, so each
/// test (or each app instance) gets isolated caches. Cloning is cheap and
/// clones share the same domains.
///
/// ## Example
///
/// ```ignore
/// let registry = CacheRegistry::builder()
///     .policy("today-totals", FreshnessPolicy::live_totals())
///     .build();
///
/// registry.define("today-totals", loader_fn(move |_| store.clone().today_totals()))?;
///
/// let snapshot = registry.read::<DailyTotals>("today-totals").await?;
/// ```
#[derive(Clone)]
pub struct CacheRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    domains: DashMap<String, Registered>,
    clock: Arc<dyn Clock>,
    default_policy: FreshnessPolicy,
    policies: HashMap<String, FreshnessPolicy>,
    stats: Arc<CacheStats>,
}

/// Internal entry storing a type-erased domain.
struct Registered {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedDomain>,
    type_id: TypeId,
}

impl Registered {
    fn downcast<T: DomainValue>(&self, name: &str) -> CacheResult<Arc<CacheDomain<T>>> {
        if self.type_id != TypeId::of::<T>() {
            return Err(CacheError::TypeMismatch {
                name: name.to_string(),
                requested: type_name::<T>(),
                actual: self.erased.value_type(),
            });
        }

        Arc::clone(&self.typed)
            .downcast::<CacheDomain<T>>()
            .map_err(|_| CacheError::TypeMismatch {
                name: name.to_string(),
                requested: type_name::<T>(),
                actual: self.erased.value_type(),
            })
    }
}

/// Builder for [`CacheRegistry`].
pub struct RegistryBuilder {
    clock: Arc<dyn Clock>,
    default_policy: FreshnessPolicy,
    policies: HashMap<String, FreshnessPolicy>,
}

impl RegistryBuilder {
    /// Use an injected clock instead of the wall clock.
    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Policy for domains without an override.
    #[must_use]
    pub fn default_policy(mut self, policy: FreshnessPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Override the policy of one domain.
    #[must_use]
    pub fn policy(mut self, domain: impl Into<String>, policy: FreshnessPolicy) -> Self {
        self.policies.insert(domain.into(), policy);
        self
    }

    /// Take the default policy and overrides from loaded settings.
    #[must_use]
    pub fn settings(mut self, settings: &Settings) -> Self {
        self.default_policy = settings.default_policy;
        self.policies
            .extend(settings.domain_policies.iter().map(|(k, v)| (k.clone(), *v)));
        self
    }

    pub fn build(self) -> CacheRegistry {
        info!(
            "Cache registry initialized ({} policy overrides)",
            self.policies.len()
        );
        CacheRegistry {
            inner: Arc::new(RegistryInner {
                domains: DashMap::new(),
                clock: self.clock,
                default_policy: self.default_policy,
                policies: self.policies,
                stats: Arc::new(CacheStats::new()),
            }),
        }
    }
}

impl CacheRegistry {
    /// Registry with the wall clock and the default policy.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            clock: Arc::new(SystemClock),
            default_policy: FreshnessPolicy::default(),
            policies: HashMap::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Policy a domain of this name gets when defined.
    pub fn policy_for(&self, name: &str) -> FreshnessPolicy {
        self.inner
            .policies
            .get(name)
            .copied()
            .unwrap_or(self.inner.default_policy)
    }

    /// Get the domain `name`, creating it with `loader` on first access.
    ///
    /// If the domain already exists with the same value type the existing
    /// domain (and its original loader) is returned.
    pub fn define<T, L>(&self, name: &str, loader: L) -> CacheResult<Arc<CacheDomain<T>>>
    where
        T: DomainValue,
        L: Loader<T>,
    {
        let policy = self.policy_for(name);
        self.define_with_policy(name, policy, loader)
    }

    /// Like [`define`](Self::define) with an explicit policy.
    pub fn define_with_policy<T, L>(
        &self,
        name: &str,
        policy: FreshnessPolicy,
        loader: L,
    ) -> CacheResult<Arc<CacheDomain<T>>>
    where
        T: DomainValue,
        L: Loader<T>,
    {
        let policy = policy.validate().map_err(|err| err.for_domain(name))?;

        match self.inner.domains.entry(name.to_string()) {
            Entry::Occupied(existing) => existing.get().downcast::<T>(name),
            Entry::Vacant(slot) => {
                debug!("Creating cache domain: {}", name);
                let domain = CacheDomain::new(
                    Arc::from(name),
                    policy,
                    Arc::new(loader),
                    Arc::clone(&self.inner.clock),
                    Arc::clone(&self.inner.stats),
                );
                slot.insert(Registered {
                    typed: Arc::clone(&domain) as Arc<dyn Any + Send + Sync>,
                    erased: Arc::clone(&domain) as Arc<dyn ErasedDomain>,
                    type_id: TypeId::of::<T>(),
                });
                Ok(domain)
            }
        }
    }

    /// Get an existing domain by name.
    pub fn domain<T: DomainValue>(&self, name: &str) -> CacheResult<Arc<CacheDomain<T>>> {
        self.inner
            .domains
            .get(name)
            .ok_or_else(|| CacheError::UnknownDomain(name.to_string()))?
            .downcast::<T>(name)
    }

    /// Stale-while-revalidate read at the registry clock's `now`.
    pub async fn read<T: DomainValue>(&self, name: &str) -> CacheResult<Snapshot<T>> {
        self.read_at(name, self.now()).await
    }

    /// Stale-while-revalidate read classified at `now`.
    ///
    /// A load failure is returned only when the read had to block on it.
    pub async fn read_at<T: DomainValue>(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> CacheResult<Snapshot<T>> {
        let domain = self.domain::<T>(name)?;
        Ok(domain.read_at(now).await?)
    }

    /// Classification and value without triggering a load.
    pub fn peek<T: DomainValue>(&self, name: &str) -> CacheResult<Snapshot<T>> {
        Ok(self.domain::<T>(name)?.peek())
    }

    /// Force a load (pull-to-refresh), joining one already running.
    pub async fn refresh<T: DomainValue>(&self, name: &str) -> CacheResult<Arc<T>> {
        let domain = self.domain::<T>(name)?;
        Ok(domain.refresh().await?)
    }

    /// Wait for the outstanding load of `name`, if any.
    pub async fn settle<T: DomainValue>(&self, name: &str) -> CacheResult<Option<Arc<T>>> {
        let domain = self.domain::<T>(name)?;
        match domain.settle().await {
            Some(outcome) => Ok(Some(outcome?)),
            None => Ok(None),
        }
    }

    pub fn subscribe<T, F>(&self, name: &str, callback: F) -> CacheResult<SubscriptionId>
    where
        T: DomainValue,
        F: Fn(&Notification<T>) + Send + Sync + 'static,
    {
        Ok(self.domain::<T>(name)?.subscribe(callback))
    }

    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) -> bool {
        self.inner
            .domains
            .get(name)
            .is_some_and(|registered| registered.erased.unsubscribe(id))
    }

    /// Apply `transform` to each listed domain, without waiting for the
    /// remote write. Each domain's transform runs on that domain's own value.
    pub fn mutate_optimistic<T, F>(&self, domains: &[&str], transform: F) -> CacheResult<MutationReport>
    where
        T: DomainValue,
        F: Fn(&T) -> T,
    {
        let transform = &transform;
        domains
            .iter()
            .fold(self.batch(), |batch, name| batch.apply::<T, _>(name, transform))
            .commit()
    }

    /// Start a mutation over domains of different value types.
    pub fn batch(&self) -> MutationBatch<'_> {
        MutationBatch::new(self)
    }

    /// Mark each listed domain explicitly stale, keeping its value.
    ///
    /// Undefined or empty domains are left missing. Returns how many entries
    /// were marked.
    pub fn invalidate(&self, domains: &[&str]) -> usize {
        let mut marked = 0;
        for name in domains {
            let erased = self
                .inner
                .domains
                .get(*name)
                .map(|registered| Arc::clone(&registered.erased));

            match erased {
                Some(domain) if domain.invalidate() => marked += 1,
                Some(_) => debug!("Nothing to invalidate in empty domain {}", name),
                None => debug!("Invalidate of undefined domain {} ignored", name),
            }
        }
        marked
    }

    /// Current classification of any domain; undefined domains are missing.
    pub fn freshness(&self, name: &str) -> Freshness {
        self.inner
            .domains
            .get(name)
            .map(|registered| Arc::clone(&registered.erased))
            .map_or(Freshness::Missing, |domain| domain.freshness())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.domains.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.domains.is_empty()
    }

    /// Names of all defined domains, sorted.
    pub fn domain_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .domains
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("domain_count", &self.len())
            .field("domain_names", &self.domain_names())
            .finish()
    }
}
