//! Core type definitions for the response cache

use crate::fingerprint::CacheKey;
use crate::routing::{ProviderId, StrategyKind};
use crate::types::Citation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Reserved tag prefix for the provider index
pub const PROVIDER_TAG_PREFIX: &str = "provider:";

/// Reserved tag prefix for the strategy index
pub const STRATEGY_TAG_PREFIX: &str = "strategy:";

pub fn provider_tag(id: &ProviderId) -> String {
    format!("{}{}", PROVIDER_TAG_PREFIX, id)
}

pub fn strategy_tag(kind: StrategyKind) -> String {
    format!("{}{}", STRATEGY_TAG_PREFIX, kind)
}

/// Computed answer handed to the cache after a successful provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePayload {
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub provider_used: ProviderId,
    pub strategy: StrategyKind,
    /// Extra invalidation tags, e.g. the query domain
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CachePayload {
    pub fn new(text: impl Into<String>, provider_used: ProviderId, strategy: StrategyKind) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
            provider_used,
            strategy,
            tags: Vec::new(),
        }
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Stored answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub key: CacheKey,
    pub payload: String,
    pub citations: Vec<Citation>,
    pub provider_used: ProviderId,
    pub strategy: StrategyKind,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CachedResponse {
    pub fn from_payload(key: CacheKey, payload: CachePayload, ttl: Duration) -> Self {
        Self {
            key,
            payload: payload.text,
            citations: payload.citations,
            provider_used: payload.provider_used,
            strategy: payload.strategy,
            created_at: Utc::now(),
            ttl,
        }
    }

    /// Approximate heap size, used for the byte limit
    pub fn approximate_size(&self) -> usize {
        let citations: usize = self
            .citations
            .iter()
            .map(|c| {
                c.source_id.len() + c.title.len() + c.url.as_ref().map(String::len).unwrap_or(0)
            })
            .sum();
        self.key.as_str().len() + self.payload.len() + self.provider_used.as_str().len() + citations
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Number of entries currently in cache
    pub entries: usize,

    /// Total size of cached data in bytes
    pub size_bytes: usize,

    /// Number of evictions due to entry or byte limits
    pub evictions_size: u64,

    /// Number of evictions due to TTL expiration
    pub evictions_ttl: u64,

    /// Entries removed by explicit invalidation
    pub invalidations: u64,

    pub avg_entry_size: usize,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    pub fn total_evictions(&self) -> u64 {
        self.evictions_size + self.evictions_ttl
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, size: {} bytes, evictions: {}, invalidations: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.size_bytes,
            self.total_evictions(),
            self.invalidations
        )
    }
}
