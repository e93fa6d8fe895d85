//! Configuration for the response cache

use crate::routing::StrategyKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for the response cache
///
/// - Default TTL: 1 hour, 15 minutes for cost-optimized answers
/// - Jitter: 12.5% so entries written together do not expire together
/// - Size limits: entry count and approximate bytes, LRU eviction beyond either
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for strategies without an override
    pub default_ttl: Duration,

    /// Per-strategy TTL overrides
    pub strategy_ttl: HashMap<StrategyKind, Duration>,

    /// Maximum number of entries in the cache
    pub max_entries: usize,

    /// Maximum total size of cached data in bytes
    pub max_size_bytes: usize,

    /// TTL jitter factor (0.0 - 1.0)
    pub ttl_jitter: f64,

    /// Enable automatic cleanup of expired entries
    pub enable_auto_cleanup: bool,

    /// Interval for automatic cleanup checks
    pub cleanup_interval: Duration,

    /// Deadline for each backend get, put or invalidate
    pub op_timeout: Duration,

    /// When true, least recently used entries are evicted first; otherwise oldest inserts
    pub enable_lru_eviction: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut strategy_ttl = HashMap::new();
        strategy_ttl.insert(StrategyKind::CostOptimized, Duration::from_secs(900));

        Self {
            default_ttl: Duration::from_secs(3600),
            strategy_ttl,
            max_entries: 10_000,
            max_size_bytes: 100 * 1024 * 1024,
            ttl_jitter: 0.125,
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(300),
            op_timeout: Duration::from_millis(100),
            enable_lru_eviction: true,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.max_size_bytes == 0 {
            return Err("max_size_bytes must be greater than 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err("ttl_jitter must be between 0.0 and 1.0".to_string());
        }

        if self.default_ttl.is_zero() || self.strategy_ttl.values().any(Duration::is_zero) {
            return Err("cache TTLs must be positive".to_string());
        }

        if self.op_timeout.is_zero() {
            return Err("op_timeout must be positive".to_string());
        }

        Ok(())
    }

    /// Base TTL for answers produced under `strategy`
    pub fn ttl_for(&self, strategy: StrategyKind) -> Duration {
        self.strategy_ttl
            .get(&strategy)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Calculate actual TTL with jitter applied
    pub fn ttl_with_jitter(&self, base: Duration) -> Duration {
        if self.ttl_jitter == 0.0 {
            return base;
        }

        let base_secs = base.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(0.0);

        Duration::from_secs_f64(final_secs)
    }
}

/// Builder for cache configuration with validation
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    strategy_ttl: HashMap<StrategyKind, Duration>,
    max_entries: Option<usize>,
    max_size_bytes: Option<usize>,
    ttl_jitter: Option<f64>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    op_timeout: Option<Duration>,
    enable_lru_eviction: Option<bool>,
}

impl CacheConfigBuilder {
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Override the TTL of one strategy
    pub fn strategy_ttl(mut self, strategy: StrategyKind, ttl: Duration) -> Self {
        self.strategy_ttl.insert(strategy, ttl);
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn max_size_bytes(mut self, size: usize) -> Self {
        self.max_size_bytes = Some(size);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    pub fn op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    pub fn enable_lru_eviction(mut self, enable: bool) -> Self {
        self.enable_lru_eviction = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        let mut strategy_ttl = defaults.strategy_ttl;
        strategy_ttl.extend(self.strategy_ttl);

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            strategy_ttl,
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            max_size_bytes: self.max_size_bytes.unwrap_or(defaults.max_size_bytes),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            op_timeout: self.op_timeout.unwrap_or(defaults.op_timeout),
            enable_lru_eviction: self
                .enable_lru_eviction
                .unwrap_or(defaults.enable_lru_eviction),
        }
    }
}

/// Preset configurations for common deployments
impl CacheConfig {
    /// Short-lived answers for fast-moving domains
    pub fn realtime() -> Self {
        let mut strategy_ttl = HashMap::new();
        strategy_ttl.insert(StrategyKind::CostOptimized, Duration::from_secs(120));

        Self {
            default_ttl: Duration::from_secs(300),
            strategy_ttl,
            max_entries: 5_000,
            max_size_bytes: 50 * 1024 * 1024,
            ttl_jitter: 0.15,
            ..Default::default()
        }
    }

    /// Configuration for memory-constrained environments
    pub fn small() -> Self {
        Self {
            default_ttl: Duration::from_secs(1800),
            max_entries: 1_000,
            max_size_bytes: 10 * 1024 * 1024,
            ttl_jitter: 0.15,
            ..Default::default()
        }
    }

    /// Configuration for large-scale deployments
    pub fn large() -> Self {
        Self {
            default_ttl: Duration::from_secs(7200),
            max_entries: 1_000_000,
            max_size_bytes: 10 * 1024 * 1024 * 1024,
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.max_entries, 10_000);
        assert!(config.enable_auto_cleanup);
        assert!(
            config.ttl_for(StrategyKind::CostOptimized)
                < config.ttl_for(StrategyKind::QualityOptimized)
        );
    }

    #[test]
    fn test_config_validation() {
        let valid_config = CacheConfig::default();
        assert!(valid_config.validate().is_ok());

        let mut invalid_config = CacheConfig::default();
        invalid_config.max_entries = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.ttl_jitter = 1.5;
        assert!(invalid_config.validate().is_err());

        let invalid_config = CacheConfig::builder()
            .strategy_ttl(StrategyKind::Balanced, Duration::ZERO)
            .build();
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .default_ttl(Duration::from_secs(600))
            .strategy_ttl(StrategyKind::Balanced, Duration::from_secs(120))
            .max_entries(5000)
            .max_size_bytes(50_000_000)
            .op_timeout(Duration::from_millis(20))
            .build();

        assert_eq!(config.default_ttl, Duration::from_secs(600));
        assert_eq!(config.ttl_for(StrategyKind::Balanced), Duration::from_secs(120));
        assert_eq!(config.ttl_for(StrategyKind::CostOptimized), Duration::from_secs(900));
        assert_eq!(config.ttl_for(StrategyKind::FixedPrimary), Duration::from_secs(600));
        assert_eq!(config.max_entries, 5000);
        assert_eq!(config.op_timeout, Duration::from_millis(20));
    }

    #[test]
    fn test_ttl_with_jitter() {
        let config = CacheConfig {
            ttl_jitter: 0.1,
            ..Default::default()
        };

        for _ in 0..20 {
            let ttl = config.ttl_with_jitter(Duration::from_secs(3600));
            assert!(ttl.as_secs_f64() >= 3600.0 - 360.0);
            assert!(ttl.as_secs_f64() <= 3600.0 + 360.0);
        }

        let exact = CacheConfig::builder().ttl_jitter(0.0).build();
        assert_eq!(exact.ttl_with_jitter(Duration::from_millis(80)), Duration::from_millis(80));
    }

    #[test]
    fn test_preset_configs() {
        assert_eq!(CacheConfig::realtime().default_ttl, Duration::from_secs(300));
        assert_eq!(CacheConfig::small().max_entries, 1_000);
        assert_eq!(CacheConfig::large().max_entries, 1_000_000);
        assert!(CacheConfig::large().validate().is_ok());
    }
}
