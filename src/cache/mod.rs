//! Cache module - Stale-while-revalidate caching for the tracker screens.
//!
//! Every screen (dashboard, progress, weight, sleep, hydration) reads
//! aggregates from named domains held by one [`CacheRegistry`] and writes
//! through the same registry, so a meal logged on one screen shows up on
//! all the others.
//!
//! ## Architecture
//!
//! - `CacheRegistry` - Named domains, injected into every screen
//! - `CacheDomain` - One cached aggregate: entry, in-flight load, subscribers
//! - `FreshnessPolicy` - Fresh / stale / missing windows per domain
//! - `ConsumerBinding` - Per-screen activation and change propagation
//! - `MutationBatch` - Optimistic writes across several domains
//!
//! ## Usage
//!
//! ```ignore
//! registry.define("today-totals", loader_fn(move |_| store.clone().today_totals()))?;
//!
//! let dashboard = ConsumerBinding::new(&registry, "today-totals", render)?;
//! dashboard.activate().await?;
//!
//! // A meal was logged: show it now, reconcile later
//! registry.mutate_optimistic(&["today-totals"], |t: &DailyTotals| t.plus_meal(480))?;
//! registry.invalidate(&["weekly-progress"]);
//! ```
//!
//! A loader result always replaces whatever the domain holds, including
//! optimistic data applied after that load started.

mod binding;
mod clock;
mod domain;
mod entry;
mod flight;
mod loader;
mod mutation;
mod policy;
mod registry;
mod stats;
mod subscriber;

pub use binding::{ConsumerBinding, ViewState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{CacheDomain, DomainValue};
pub use entry::{CacheEntry, Freshness, Snapshot};
pub use loader::{FnLoader, LoadFuture, Loader, loader_fn};
pub use mutation::{MutationBatch, MutationReport};
pub use policy::FreshnessPolicy;
pub use registry::{CacheRegistry, RegistryBuilder};
pub use stats::{CacheStats, StatsSnapshot};
pub use subscriber::{ChangeCause, Notification, SubscriptionId};
