//! Nutricache - Demo host for the tracker cache engine.
//!
//! Wires a [`CacheRegistry`] to an in-memory store and plays a short
//! session across three screens.
//!
//! ## Architecture
//!
//! - `nutricache::config` - Environment configuration
//! - `nutricache::cache` - Registry, domains and consumer bindings
//! - `host` - In-memory store, loaders and the scripted session

mod host;

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use nutricache::{CacheRegistry, FreshnessPolicy, Settings};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("nutricache=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    info!("Starting Nutricache demo...");

    let settings = Settings::from_env()?;
    info!("Configuration loaded successfully");
    info!(
        "Default windows: fresh {:?}, stale {:?}",
        settings.default_policy.fresh(),
        settings.default_policy.stale()
    );

    // Built-in windows per screen; environment overrides win
    let registry = CacheRegistry::builder()
        .policy(host::TODAY_TOTALS, FreshnessPolicy::live_totals())
        .policy(host::WEIGHT_LATEST, FreshnessPolicy::slow_moving())
        .settings(&settings)
        .build();
    let store = host::MemoryStore::with_latency(Duration::from_millis(150));
    host::define_domains(&registry, &store)?;

    host::run_session(&registry, &store).await?;

    info!("Registry: {:?}", registry);
    Ok(())
}
