//! Resolver configuration
//!
//! [`ResolverConfig`] nests the per-component configs and carries the deadlines the
//! orchestrator applies to its collaborators.

use crate::cache::CacheConfig;
use crate::executor::{Environment, RetryPolicy};
use crate::freshness::FreshnessConfig;
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const ENV_PREFIX: &str = "RESOLVER_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Deployment environment; production makes every resolution fail-fast,
    /// whatever environment the query carries
    pub environment: Environment,
    /// Deadline for the golden-set lookup
    pub golden_timeout: Duration,
    /// Deadline for reading the epoch snapshot
    pub epoch_timeout: Duration,
    /// Deadline for each provider attempt
    pub provider_timeout: Duration,
    /// Run the cache lookup concurrently with the golden match
    pub speculative_cache_lookup: bool,
    pub retry: RetryPolicy,
    pub freshness: FreshnessConfig,
    pub cache: CacheConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            golden_timeout: Duration::from_millis(500),
            epoch_timeout: Duration::from_millis(100),
            provider_timeout: Duration::from_secs(30),
            speculative_cache_lookup: true,
            retry: RetryPolicy::default(),
            freshness: FreshnessConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub fn builder() -> ResolverConfigBuilder {
        ResolverConfigBuilder::default()
    }

    /// Production preset: fail-fast retry without backoff, tighter provider deadline
    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            provider_timeout: Duration::from_secs(20),
            retry: RetryPolicy::production(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.golden_timeout.is_zero() {
            return Err("golden_timeout must be positive".to_string());
        }

        if self.epoch_timeout.is_zero() {
            return Err("epoch_timeout must be positive".to_string());
        }

        if self.provider_timeout.is_zero() {
            return Err("provider_timeout must be positive".to_string());
        }

        self.retry.validate()?;
        self.freshness.validate()?;
        self.cache.validate()?;

        Ok(())
    }

    /// Load `.env` if present, then apply `RESOLVER_*` variables over the defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Apply variables from `lookup` over the defaults of the named environment
    ///
    /// Recognized names (prefixed with `RESOLVER_`): `ENVIRONMENT`, `GOLDEN_TIMEOUT_MS`,
    /// `EPOCH_TIMEOUT_MS`, `PROVIDER_TIMEOUT_MS`, `SPECULATIVE_CACHE_LOOKUP`,
    /// `MAX_ATTEMPTS`, `CACHE_TTL_SECS`, `CACHE_MAX_ENTRIES`, `FRESHNESS_WINDOW_DAYS`.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        let environment = match var("ENVIRONMENT") {
            Some(value) => Environment::from_str(&value)
                .map_err(|e| anyhow!(e))
                .with_context(|| format!("invalid {}ENVIRONMENT", ENV_PREFIX))?,
            None => Environment::Development,
        };

        let mut config = if environment.is_production() {
            Self::production()
        } else {
            Self {
                environment,
                ..Default::default()
            }
        };

        if let Some(ms) = parse_var::<u64>(&var, "GOLDEN_TIMEOUT_MS")? {
            config.golden_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&var, "EPOCH_TIMEOUT_MS")? {
            config.epoch_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&var, "PROVIDER_TIMEOUT_MS")? {
            config.provider_timeout = Duration::from_millis(ms);
        }
        if let Some(enabled) = parse_var::<bool>(&var, "SPECULATIVE_CACHE_LOOKUP")? {
            config.speculative_cache_lookup = enabled;
        }
        if let Some(attempts) = parse_var::<u32>(&var, "MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(secs) = parse_var::<u64>(&var, "CACHE_TTL_SECS")? {
            config.cache.default_ttl = Duration::from_secs(secs);
        }
        if let Some(entries) = parse_var::<usize>(&var, "CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = entries;
        }
        if let Some(days) = parse_var::<u64>(&var, "FRESHNESS_WINDOW_DAYS")? {
            let secs = days.checked_mul(24 * 60 * 60).ok_or_else(|| {
                anyhow!("invalid {}FRESHNESS_WINDOW_DAYS='{}': out of range", ENV_PREFIX, days)
            })?;
            config.freshness.window = Duration::from_secs(secs);
        }

        config.validate().map_err(|e| anyhow!(e))?;
        debug!("Loaded resolver config for {}", config.environment);
        Ok(config)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid {}{}='{}': {}", ENV_PREFIX, name, raw, e)),
        None => Ok(None),
    }
}

#[derive(Debug, Default)]
pub struct ResolverConfigBuilder {
    environment: Option<Environment>,
    golden_timeout: Option<Duration>,
    epoch_timeout: Option<Duration>,
    provider_timeout: Option<Duration>,
    speculative_cache_lookup: Option<bool>,
    retry: Option<RetryPolicy>,
    freshness: Option<FreshnessConfig>,
    cache: Option<CacheConfig>,
}

impl ResolverConfigBuilder {
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn golden_timeout(mut self, timeout: Duration) -> Self {
        self.golden_timeout = Some(timeout);
        self
    }

    pub fn epoch_timeout(mut self, timeout: Duration) -> Self {
        self.epoch_timeout = Some(timeout);
        self
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = Some(timeout);
        self
    }

    pub fn speculative_cache_lookup(mut self, enabled: bool) -> Self {
        self.speculative_cache_lookup = Some(enabled);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn freshness(mut self, freshness: FreshnessConfig) -> Self {
        self.freshness = Some(freshness);
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> ResolverConfig {
        let defaults = ResolverConfig::default();
        ResolverConfig {
            environment: self.environment.unwrap_or(defaults.environment),
            golden_timeout: self.golden_timeout.unwrap_or(defaults.golden_timeout),
            epoch_timeout: self.epoch_timeout.unwrap_or(defaults.epoch_timeout),
            provider_timeout: self.provider_timeout.unwrap_or(defaults.provider_timeout),
            speculative_cache_lookup: self
                .speculative_cache_lookup
                .unwrap_or(defaults.speculative_cache_lookup),
            retry: self.retry.unwrap_or(defaults.retry),
            freshness: self.freshness.unwrap_or(defaults.freshness),
            cache: self.cache.unwrap_or(defaults.cache),
        }
    }
}
