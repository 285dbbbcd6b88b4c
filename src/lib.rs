//! Nutricache - Shared freshness cache for a calorie tracker.
//!
//! The tracker's screens all read overlapping aggregates from a remote store
//! and all write to it. This crate is the one engine behind them:
//! stale-while-revalidate reads, single-flight loads, optimistic local
//! mutation and cross-screen invalidation.
//!
//! ## Modules
//!
//! - `cache` - Registry, domains, policies and consumer bindings
//! - `config` - Environment configuration
//! - `error` - Load and configuration errors

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{
    CacheRegistry, ConsumerBinding, Freshness, FreshnessPolicy, Snapshot, ViewState, loader_fn,
};
pub use config::Settings;
pub use error::{CacheError, CacheResult, ConfigurationError, LoadError};
