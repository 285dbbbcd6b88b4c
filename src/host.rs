//! Demo host - Stands in for the tracker app around the cache engine.
//!
//! Provides an in-memory "remote store" with artificial latency, one loader
//! per domain and a scripted session across three screens.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use nutricache::{CacheRegistry, ConsumerBinding, ViewState, loader_fn};

pub const TODAY_TOTALS: &str = "today-totals";
pub const WEIGHT_LATEST: &str = "weight-latest";

/// Aggregate shown on the dashboard and progress screens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotals {
    pub calories: u32,
    pub meals: u32,
}

impl DailyTotals {
    pub fn with_meal(&self, calories: u32) -> Self {
        Self {
            calories: self.calories + calories,
            meals: self.meals + 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightSummary {
    pub latest_kg: Option<f32>,
    pub entries: usize,
}

/// In-memory replacement for the remote store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    meals: Arc<Mutex<Vec<u32>>>,
    weights: Arc<Mutex<Vec<f32>>>,
    latency: Duration,
}

impl MemoryStore {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub async fn today_totals(&self) -> Result<DailyTotals> {
        tokio::time::sleep(self.latency).await;
        let meals = self.meals.lock();
        Ok(DailyTotals {
            calories: meals.iter().sum(),
            meals: meals.len() as u32,
        })
    }

    pub async fn weight_summary(&self) -> Result<WeightSummary> {
        tokio::time::sleep(self.latency).await;
        let weights = self.weights.lock();
        Ok(WeightSummary {
            latest_kg: weights.last().copied(),
            entries: weights.len(),
        })
    }

    pub async fn insert_meal(&self, calories: u32) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        if calories == 0 {
            bail!("meal without calories rejected");
        }
        self.meals.lock().push(calories);
        Ok(())
    }

    pub async fn insert_weight(&self, kg: f32) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        self.weights.lock().push(kg);
        Ok(())
    }
}

/// Register one loader per domain.
pub fn define_domains(registry: &CacheRegistry, store: &MemoryStore) -> Result<()> {
    let totals_store = store.clone();
    registry.define(
        TODAY_TOTALS,
        loader_fn(move |_: &str| {
            let store = totals_store.clone();
            async move { store.today_totals().await }
        }),
    )?;

    let weight_store = store.clone();
    registry.define(
        WEIGHT_LATEST,
        loader_fn(move |_: &str| {
            let store = weight_store.clone();
            async move { store.weight_summary().await }
        }),
    )?;

    Ok(())
}

fn render<T: Serialize + 'static>(screen: &'static str) -> impl Fn(&ViewState<T>) + Send + Sync + 'static {
    move |state: &ViewState<T>| match state {
        ViewState::Empty => {}
        ViewState::Loading => info!("[{}] loading...", screen),
        ViewState::Ready { value, freshness } => {
            let body = serde_json::to_string(value.as_ref()).unwrap_or_default();
            info!("[{}] {} ({})", screen, body, freshness);
        }
        ViewState::Failed(err) => warn!("[{}] {}", screen, err),
    }
}

/// Log a meal the way the food screen does: local first, remote after.
pub async fn log_meal(registry: &CacheRegistry, store: &MemoryStore, calories: u32) -> Result<()> {
    registry.mutate_optimistic(&[TODAY_TOTALS], |totals: &DailyTotals| totals.with_meal(calories))?;

    let registry = registry.clone();
    let store = store.clone();
    tokio::spawn(async move {
        match store.insert_meal(calories).await {
            Ok(()) => {
                registry.invalidate(&[TODAY_TOTALS]);
            }
            // No rollback: the next reload reconciles the totals
            Err(err) => warn!("Meal write failed: {:#}", err),
        }
    });
    Ok(())
}

/// Scripted session across the dashboard, progress and weight screens.
pub async fn run_session(registry: &CacheRegistry, store: &MemoryStore) -> Result<()> {
    store.insert_meal(350).await?;
    store.insert_weight(72.4).await?;

    let dashboard = ConsumerBinding::<DailyTotals>::new(registry, TODAY_TOTALS, render("dashboard"))?;
    let progress = ConsumerBinding::<DailyTotals>::new(registry, TODAY_TOTALS, render("progress"))?;
    let weight = ConsumerBinding::<WeightSummary>::new(registry, WEIGHT_LATEST, render("weight"))?;

    dashboard.activate().await?;
    progress.activate().await?;
    weight.activate().await?;

    log_meal(registry, store, 480).await?;

    // Let the remote write land and the invalidation propagate
    tokio::time::sleep(store.latency * 2).await;
    progress.activate().await?;
    registry.settle::<DailyTotals>(TODAY_TOTALS).await?;

    store.insert_weight(72.1).await?;
    registry.invalidate(&[WEIGHT_LATEST]);
    weight.activate().await?;
    registry.settle::<WeightSummary>(WEIGHT_LATEST).await?;

    let stats = registry.stats();
    info!(
        "Session done: {}",
        serde_json::to_string(&stats).unwrap_or_default()
    );
    Ok(())
}
