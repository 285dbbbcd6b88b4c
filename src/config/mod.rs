//! Configuration module for Nutricache.
//!
//! Loads cache settings from environment variables.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::cache::FreshnessPolicy;
use crate::error::ConfigurationError;

const FRESH_WINDOW_KEY: &str = "CACHE_FRESH_WINDOW_MS";
const STALE_WINDOW_KEY: &str = "CACHE_STALE_WINDOW_MS";
const DOMAIN_POLICIES_KEY: &str = "CACHE_DOMAIN_POLICIES";

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Policy for domains without an override.
    pub default_policy: FreshnessPolicy,

    /// Per-domain overrides, from `name=fresh_ms:stale_ms` pairs
    /// (comma-separated).
    pub domain_policies: HashMap<String, FreshnessPolicy>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_policy: FreshnessPolicy::default(),
            domain_policies: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from environment variables (and `.env`).
    pub fn from_env() -> Result<Self, ConfigurationError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut default_policy = FreshnessPolicy::default();
        if let Some(raw) = lookup(FRESH_WINDOW_KEY) {
            default_policy = default_policy.fresh_window(parse_millis(FRESH_WINDOW_KEY, &raw)?);
        }
        if let Some(raw) = lookup(STALE_WINDOW_KEY) {
            default_policy = default_policy.stale_window(parse_millis(STALE_WINDOW_KEY, &raw)?);
        }
        let default_policy = default_policy.validate()?;

        let domain_policies = match lookup(DOMAIN_POLICIES_KEY) {
            Some(raw) => parse_domain_policies(&raw)?,
            None => HashMap::new(),
        };

        Ok(Self {
            default_policy,
            domain_policies,
        })
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration, ConfigurationError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(key, raw))
}

/// Parse `today-totals=5000:30000,weight-trend=300000:3600000`.
fn parse_domain_policies(raw: &str) -> Result<HashMap<String, FreshnessPolicy>, ConfigurationError> {
    let mut policies = HashMap::new();

    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, windows) = pair
            .split_once('=')
            .ok_or_else(|| invalid(DOMAIN_POLICIES_KEY, pair))?;
        let (fresh, stale) = windows
            .split_once(':')
            .ok_or_else(|| invalid(DOMAIN_POLICIES_KEY, pair))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(invalid(DOMAIN_POLICIES_KEY, pair));
        }

        let policy = FreshnessPolicy::new(
            parse_millis(DOMAIN_POLICIES_KEY, fresh)?,
            parse_millis(DOMAIN_POLICIES_KEY, stale)?,
        )
        .map_err(|err| err.for_domain(name))?;

        policies.insert(name.to_string(), policy);
    }

    Ok(policies)
}

fn invalid(key: &str, value: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
