//! Advisory front of the cache backend
//!
//! The cache is an optimization. Backend errors and timeouts are logged and read as a
//! miss (get) or dropped (put, invalidate); they never fail a resolution.

use crate::cache::{
    config::CacheConfig,
    invalidation::InvalidationPredicate,
    store::CacheBackend,
    types::{provider_tag, strategy_tag, CachePayload, CachedResponse},
};
use crate::error::BackendError;
use crate::fingerprint::CacheKey;
use crate::routing::StrategyKind;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ResponseCache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    degraded_ops: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            degraded_ops: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Backend operations that failed or timed out since construction
    pub fn degraded_ops(&self) -> u64 {
        self.degraded_ops.load(Ordering::Relaxed)
    }

    /// Jittered TTL for a strategy
    pub fn ttl_for(&self, strategy: StrategyKind) -> Duration {
        self.config.ttl_with_jitter(self.config.ttl_for(strategy))
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        match self.guarded("get", self.backend.get(key)).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Cache get degraded to miss for {}: {}", key, e);
                None
            }
        }
    }

    /// Store a computed answer; `ttl` defaults to the strategy TTL with jitter
    pub async fn put(&self, key: CacheKey, payload: CachePayload, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.ttl_for(payload.strategy));

        let mut tags = payload.tags.clone();
        tags.push(provider_tag(&payload.provider_used));
        tags.push(strategy_tag(payload.strategy));

        let response = CachedResponse::from_payload(key.clone(), payload, ttl);
        match self.guarded("put", self.backend.put(response, tags)).await {
            Ok(()) => debug!("Cached response {} for {:?}", key, ttl),
            Err(e) => warn!("Cache put dropped for {}: {}", key, e),
        }
    }

    /// Remove matching entries; returns how many were removed, zero if the backend failed
    pub async fn invalidate(&self, predicate: InvalidationPredicate) -> usize {
        match self.guarded("invalidate", self.backend.invalidate(&predicate)).await {
            Ok(event) => event.count(),
            Err(e) => {
                warn!("Cache invalidation {:?} dropped: {}", predicate, e);
                0
            }
        }
    }

    async fn guarded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        let result = match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::timeout(
                self.config.op_timeout.as_millis() as u64,
                format!("cache {}", operation),
            )),
        };
        if result.is_err() {
            self.degraded_ops.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}
