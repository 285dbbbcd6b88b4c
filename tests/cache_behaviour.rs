//! End-to-end behaviour of the registry: single-flight loading, optimistic
//! writes racing a reload, invalidation fan-out and failure handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Notify;

use nutricache::cache::{ChangeCause, Clock, ManualClock, Notification};
use nutricache::error::LoadFailure;
use nutricache::{
    CacheError, CacheRegistry, ConsumerBinding, Freshness, FreshnessPolicy, ViewState, loader_fn,
};

const TOTALS: &str = "today-totals";

#[derive(Debug, Clone, PartialEq)]
struct Totals {
    calories: u32,
}

/// Remote stand-in: the value it serves, how often it was asked, and an
/// optional gate the loader waits on after reading the value.
#[derive(Clone, Default)]
struct Server {
    calories: Arc<AtomicU32>,
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    gated: Arc<AtomicBool>,
    gate: Arc<Notify>,
    latency: Option<Duration>,
}

impl Server {
    fn serving(calories: u32) -> Self {
        let server = Self::default();
        server.calories.store(calories, Ordering::SeqCst);
        server
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn fetch(self) -> anyhow::Result<Totals> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let calories = self.calories.load(Ordering::SeqCst);

        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("network unreachable");
        }
        Ok(Totals { calories })
    }
}

fn live_registry(clock: &ManualClock) -> CacheRegistry {
    CacheRegistry::builder()
        .clock(clock.clone())
        .policy(TOTALS, FreshnessPolicy::from_millis(5_000, 30_000).unwrap())
        .build()
}

fn define_totals(registry: &CacheRegistry, server: &Server) {
    let server = server.clone();
    registry
        .define(TOTALS, loader_fn(move |_: &str| server.clone().fetch()))
        .unwrap();
}

fn add(calories: u32) -> impl Fn(&Totals) -> Totals {
    move |totals: &Totals| Totals {
        calories: totals.calories + calories,
    }
}

type Log = Arc<Mutex<Vec<(ChangeCause, Freshness, u32)>>>;

fn recorder(log: &Log) -> impl Fn(&Notification<Totals>) + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |n: &Notification<Totals>| log.lock().push((n.cause, n.freshness, n.value.calories))
}

#[tokio::test]
async fn test_concurrent_missing_reads_share_one_load() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let server = Server::serving(500).with_latency(Duration::from_millis(20));
    define_totals(&registry, &server);

    let reads = (0..8).map(|_| registry.read::<Totals>(TOTALS));
    let snapshots = join_all(reads).await;

    assert_eq!(server.calls(), 1);
    let first = snapshots[0].as_ref().unwrap().value.clone().unwrap();
    for snapshot in &snapshots {
        let snapshot = snapshot.as_ref().unwrap();
        assert_eq!(snapshot.freshness, Freshness::Missing);
        assert!(Arc::ptr_eq(snapshot.value.as_ref().unwrap(), &first));
    }

    let stats = registry.stats();
    assert_eq!(stats.loads_started, 1);
    assert_eq!(stats.loads_joined, 7);
}

#[tokio::test]
async fn test_today_totals_timeline() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let server = Server::serving(500);
    define_totals(&registry, &server);

    // t=0: first load
    registry.read::<Totals>(TOTALS).await.unwrap();

    // t=4000: still fresh, no load
    clock.advance_millis(4_000);
    let snap = registry.read::<Totals>(TOTALS).await.unwrap();
    assert_eq!(snap.freshness, Freshness::Fresh);
    assert_eq!(snap.value.unwrap().calories, 500);
    assert_eq!(server.calls(), 1);

    // t=4500: optimistic +200 resets the age
    clock.advance_millis(500);
    let report = registry.mutate_optimistic(&[TOTALS], add(200)).unwrap();
    assert_eq!(report.applied, vec![TOTALS.to_string()]);
    let snap = registry.peek::<Totals>(TOTALS).unwrap();
    assert_eq!(snap.freshness, Freshness::Fresh);
    assert_eq!(snap.value.unwrap().calories, 700);

    // t=40000: past the stale window of the mutated entry
    clock.advance_millis(35_500);
    assert_eq!(registry.freshness(TOTALS), Freshness::Missing);
    assert!(registry.peek::<Totals>(TOTALS).unwrap().value.is_none());

    let snap = registry.read::<Totals>(TOTALS).await.unwrap();
    assert_eq!(snap.freshness, Freshness::Missing);
    assert_eq!(snap.value.unwrap().calories, 500);
    assert_eq!(server.calls(), 2);
}

#[tokio::test]
async fn test_reload_supersedes_optimistic_value() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let server = Server::serving(500);
    define_totals(&registry, &server);

    registry.read::<Totals>(TOTALS).await.unwrap();

    // a stale read starts a reload that reads the server before the write lands
    server.gated.store(true, Ordering::SeqCst);
    clock.advance_millis(10_000);
    let stale = registry.read::<Totals>(TOTALS).await.unwrap();
    assert_eq!(stale.freshness, Freshness::Stale);
    while server.calls() < 2 {
        tokio::task::yield_now().await;
    }

    registry.mutate_optimistic(&[TOTALS], add(200)).unwrap();
    assert_eq!(registry.peek::<Totals>(TOTALS).unwrap().value.unwrap().calories, 700);

    server.gate.notify_one();
    let installed = registry.settle::<Totals>(TOTALS).await.unwrap().unwrap();

    assert_eq!(installed.calories, 500);
    let snap = registry.peek::<Totals>(TOTALS).unwrap();
    assert_eq!(snap.freshness, Freshness::Fresh);
    assert_eq!(snap.value.unwrap().calories, 500);
}

#[tokio::test]
async fn test_invalidate_then_read_serves_stale_and_revalidates() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let server = Server::serving(500);
    define_totals(&registry, &server);

    registry.read::<Totals>(TOTALS).await.unwrap();
    server.calories.store(980, Ordering::SeqCst);

    assert_eq!(registry.invalidate(&[TOTALS]), 1);
    let snap = registry.read::<Totals>(TOTALS).await.unwrap();
    assert_eq!(snap.freshness, Freshness::Stale);
    assert_eq!(snap.value.unwrap().calories, 500);

    let reloaded = registry.settle::<Totals>(TOTALS).await.unwrap().unwrap();
    assert_eq!(reloaded.calories, 980);
    assert_eq!(registry.freshness(TOTALS), Freshness::Fresh);
}

#[tokio::test]
async fn test_equal_reload_notifies_nobody() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let server = Server::serving(500);
    define_totals(&registry, &server);

    let log = Arc::new(Mutex::new(Vec::new()));
    registry.subscribe(TOTALS, recorder(&log)).unwrap();

    registry.refresh::<Totals>(TOTALS).await.unwrap();
    registry.refresh::<Totals>(TOTALS).await.unwrap();
    registry.refresh::<Totals>(TOTALS).await.unwrap();

    assert_eq!(server.calls(), 3);
    assert_eq!(*log.lock(), vec![(ChangeCause::Loaded, Freshness::Fresh, 500)]);
}

#[tokio::test]
async fn test_invalidation_reaches_other_mounted_screen() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let server = Server::serving(500);
    define_totals(&registry, &server);

    let dashboard = ConsumerBinding::new(&registry, TOTALS, |_: &ViewState<Totals>| {}).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry.subscribe(TOTALS, recorder(&log)).unwrap();

    dashboard.activate().await.unwrap();
    assert_eq!(dashboard.view().freshness(), Some(Freshness::Fresh));

    // the food screen writes and invalidates
    registry.invalidate(&[TOTALS]);

    assert_eq!(dashboard.view().freshness(), Some(Freshness::Stale));
    assert_eq!(dashboard.view().value().unwrap().calories, 500);
    assert_eq!(
        log.lock().last(),
        Some(&(ChangeCause::Invalidated, Freshness::Stale, 500))
    );
}

#[tokio::test]
async fn test_optimistic_write_updates_every_listed_domain() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let today = Server::serving(500);
    let week = Server::serving(9_000);
    define_totals(&registry, &today);
    let week_loader = week.clone();
    registry
        .define("week-totals", loader_fn(move |_: &str| week_loader.clone().fetch()))
        .unwrap();

    let progress = ConsumerBinding::new(&registry, "week-totals", |_: &ViewState<Totals>| {}).unwrap();
    registry.read::<Totals>(TOTALS).await.unwrap();
    progress.activate().await.unwrap();

    let report = registry
        .mutate_optimistic(&[TOTALS, "week-totals"], add(350))
        .unwrap();
    assert_eq!(report.applied.len(), 2);

    assert_eq!(registry.peek::<Totals>(TOTALS).unwrap().value.unwrap().calories, 850);
    assert_eq!(progress.view().value().unwrap().calories, 9_350);
    assert_eq!(today.calls() + week.calls(), 2);
}

#[tokio::test]
async fn test_mutation_before_first_load_is_skipped() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    define_totals(&registry, &Server::serving(500));

    let report = registry.mutate_optimistic(&[TOTALS], add(200)).unwrap();
    assert_eq!(report.skipped, vec![TOTALS.to_string()]);
    assert_eq!(registry.freshness(TOTALS), Freshness::Missing);
}

#[tokio::test]
async fn test_background_failure_keeps_stale_value() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let server = Server::serving(500);
    define_totals(&registry, &server);

    registry.read::<Totals>(TOTALS).await.unwrap();
    let loaded_at = clock.now();
    server.failing.store(true, Ordering::SeqCst);
    clock.advance_millis(10_000);

    let snap = registry.read::<Totals>(TOTALS).await.unwrap();
    assert_eq!(snap.freshness, Freshness::Stale);
    assert!(registry.settle::<Totals>(TOTALS).await.is_err());

    assert_eq!(registry.stats().background_failures, 1);
    let domain = registry.domain::<Totals>(TOTALS).unwrap();
    assert!(!domain.is_loading());
    assert_eq!(domain.entry().unwrap().fetched_at(), loaded_at);

    // the slot was released, so the next stale read revalidates again
    server.failing.store(false, Ordering::SeqCst);
    server.calories.store(720, Ordering::SeqCst);
    registry.read::<Totals>(TOTALS).await.unwrap();
    let reloaded = registry.settle::<Totals>(TOTALS).await.unwrap().unwrap();
    assert_eq!(reloaded.calories, 720);
    assert_eq!(server.calls(), 3);
}

#[tokio::test]
async fn test_blocking_failure_is_returned_and_retried() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let server = Server::serving(500);
    server.failing.store(true, Ordering::SeqCst);
    define_totals(&registry, &server);

    let err = registry.read::<Totals>(TOTALS).await.unwrap_err();
    match err {
        CacheError::Load(load) => {
            assert_eq!(load.domain, TOTALS);
            assert!(matches!(load.failure, LoadFailure::Rejected(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(registry.freshness(TOTALS), Freshness::Missing);

    server.failing.store(false, Ordering::SeqCst);
    let snap = registry.read::<Totals>(TOTALS).await.unwrap();
    assert_eq!(snap.value.unwrap().calories, 500);
}

#[tokio::test]
async fn test_panicking_loader_releases_slot() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    registry
        .define(
            TOTALS,
            loader_fn(move |_: &str| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        panic!("loader bug");
                    }
                    Ok(Totals { calories: 500 })
                }
            }),
        )
        .unwrap();

    let err = registry.read::<Totals>(TOTALS).await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::Load(ref load) if matches!(load.failure, LoadFailure::Aborted(_))
    ));

    let snap = registry.read::<Totals>(TOTALS).await.unwrap();
    assert_eq!(snap.value.unwrap().calories, 500);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_abandoned_activation_still_installs() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let server = Server::serving(500).with_latency(Duration::from_millis(30));
    define_totals(&registry, &server);

    let binding = ConsumerBinding::new(&registry, TOTALS, |_: &ViewState<Totals>| {}).unwrap();
    let abandoned = tokio::time::timeout(Duration::from_millis(1), binding.activate()).await;
    assert!(abandoned.is_err());
    drop(binding);

    let installed = registry.settle::<Totals>(TOTALS).await.unwrap().unwrap();
    assert_eq!(installed.calories, 500);
    assert_eq!(registry.freshness(TOTALS), Freshness::Fresh);
    assert_eq!(server.calls(), 1);
}

#[tokio::test]
async fn test_mounted_screen_turns_fresh_after_equal_revalidation() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let server = Server::serving(500);
    define_totals(&registry, &server);

    let dashboard = ConsumerBinding::new(&registry, TOTALS, |_: &ViewState<Totals>| {}).unwrap();
    dashboard.activate().await.unwrap();

    registry.invalidate(&[TOTALS]);
    registry.read::<Totals>(TOTALS).await.unwrap();
    registry.settle::<Totals>(TOTALS).await.unwrap();

    assert_eq!(registry.freshness(TOTALS), Freshness::Fresh);
    assert_eq!(dashboard.view().freshness(), Some(Freshness::Fresh));
    assert_eq!(server.calls(), 2);
}

#[tokio::test]
async fn test_mutation_after_invalidate_is_fresh() {
    let clock = ManualClock::at_epoch();
    let registry = live_registry(&clock);
    let server = Server::serving(500);
    define_totals(&registry, &server);

    registry.read::<Totals>(TOTALS).await.unwrap();
    registry.invalidate(&[TOTALS]);
    assert_eq!(registry.freshness(TOTALS), Freshness::Stale);

    registry.mutate_optimistic(&[TOTALS], add(200)).unwrap();
    assert_eq!(registry.freshness(TOTALS), Freshness::Fresh);

    let snap = registry.read::<Totals>(TOTALS).await.unwrap();
    assert_eq!(snap.freshness, Freshness::Fresh);
    assert_eq!(snap.value.unwrap().calories, 700);
    assert_eq!(server.calls(), 1);
    assert!(!registry.domain::<Totals>(TOTALS).unwrap().is_loading());
}
