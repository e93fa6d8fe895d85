//! Cache backends: the storage trait and the in-memory store with LRU eviction

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    invalidation::{IndexLookup, InvalidationEvent, InvalidationPredicate, InvalidationReason},
    types::{CacheStats, CachedResponse},
};
use crate::error::BackendError;
use crate::fingerprint::CacheKey;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Storage behind [`crate::cache::ResponseCache`]
///
/// Each operation is atomic per key: a racing get observes the old or the new response,
/// never a partial one.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, BackendError>;

    async fn put(&self, response: CachedResponse, tags: Vec<String>) -> Result<(), BackendError>;

    async fn invalidate(
        &self,
        predicate: &InvalidationPredicate,
    ) -> Result<InvalidationEvent, BackendError>;
}

/// Response cache with TTL support and LRU eviction
///
/// - Ordered key map so signature-prefix sweeps are range scans
/// - Tag index for tag, provider and strategy invalidation
/// - LRU eviction by entry count and approximate byte size
pub struct InMemoryCacheBackend {
    pub(crate) config: CacheConfig,

    store: Arc<RwLock<CacheStore>>,

    available: AtomicBool,
}

struct CacheStore {
    entries: BTreeMap<CacheKey, CacheEntry>,

    tag_index: HashMap<String, HashSet<CacheKey>>,

    /// Eviction order, least recently used first
    lru_queue: VecDeque<CacheKey>,

    stats: CacheStats,

    current_size_bytes: usize,
}

impl CacheStore {
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k.as_str() != key);
        for tag in &entry.metadata.tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        self.current_size_bytes = self
            .current_size_bytes
            .saturating_sub(entry.metadata.size_bytes);
        Some(entry)
    }

    fn touch(&mut self, key: &CacheKey) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.clone());
    }

    fn refresh_stats(&mut self) {
        self.stats.entries = self.entries.len();
        self.stats.size_bytes = self.current_size_bytes;
        self.stats.avg_entry_size = if self.entries.is_empty() {
            0
        } else {
            self.current_size_bytes / self.entries.len()
        };
    }

    /// Keys selected by a predicate, resolved through the key order or the tag index
    fn matching_keys(&self, lookup: &IndexLookup) -> Vec<CacheKey> {
        match lookup {
            IndexLookup::KeyPrefix(prefix) => self
                .entries
                .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
                .take_while(|(key, _)| key.as_str().starts_with(prefix.as_str()))
                .map(|(key, _)| key.clone())
                .collect(),
            IndexLookup::Tag(tag) => self
                .tag_index
                .get(tag)
                .map(|keys| keys.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }
}

impl InMemoryCacheBackend {
    pub fn new(config: CacheConfig) -> Self {
        info!("Initializing response cache with config: {:?}", config);

        let store = CacheStore {
            entries: BTreeMap::new(),
            tag_index: HashMap::new(),
            lru_queue: VecDeque::new(),
            stats: CacheStats::default(),
            current_size_bytes: 0,
        };

        Self {
            config,
            store: Arc::new(RwLock::new(store)),
            available: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Simulate an outage: every operation fails with `BackendError::Unavailable`
    pub fn set_available(&self, available: bool) {
        info!("Response cache availability set to {}", available);
        self.available.store(available, Ordering::Release);
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("response cache offline".to_string()))
        }
    }

    /// Check if a key exists in the cache (without updating access time)
    pub async fn contains_key(&self, key: &CacheKey) -> bool {
        let store = self.store.read().await;
        store.entries.contains_key(key)
    }

    pub async fn remove(&self, key: &CacheKey) -> Option<CachedResponse> {
        let mut store = self.store.write().await;
        let entry = store.remove_entry(key.as_str())?;
        store.stats.invalidations += 1;
        store.refresh_stats();
        debug!("Removed cache entry: {}", key);
        Some(entry.response)
    }

    /// Clear all entries from the cache
    pub async fn clear(&self) -> InvalidationEvent {
        let mut store = self.store.write().await;

        let keys: Vec<CacheKey> = store.entries.keys().cloned().collect();
        store.entries.clear();
        store.tag_index.clear();
        store.lru_queue.clear();
        store.current_size_bytes = 0;
        store.stats.invalidations += keys.len() as u64;
        store.refresh_stats();

        info!("Cleared {} entries from cache", keys.len());
        InvalidationEvent::new(InvalidationReason::Manual, keys).with_context("clear")
    }

    /// Remove all expired entries
    pub async fn cleanup_expired(&self) -> Vec<InvalidationEvent> {
        let mut store = self.store.write().await;

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        if expired_keys.is_empty() {
            return Vec::new();
        }

        for key in &expired_keys {
            store.remove_entry(key.as_str());
        }
        store.stats.evictions_ttl += expired_keys.len() as u64;
        store.refresh_stats();

        debug!("Cleaned up {} expired entries", expired_keys.len());
        let count = expired_keys.len();
        vec![InvalidationEvent::new(InvalidationReason::Expired, expired_keys)
            .with_context(format!("Cleaned up {} expired entries", count))]
    }

    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        store.stats.clone()
    }

    pub async fn size_bytes(&self) -> usize {
        let store = self.store.read().await;
        store.current_size_bytes
    }

    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        let store = self.store.read().await;
        store.entries.is_empty()
    }

    /// Evict until one entry of `needed_size` bytes fits
    fn evict_if_needed(&self, store: &mut CacheStore, needed_size: usize) {
        while store.entries.len() >= self.config.max_entries
            || store.current_size_bytes + needed_size > self.config.max_size_bytes
        {
            match store.lru_queue.pop_front() {
                Some(key) => {
                    debug!("Evicting entry due to size limits: {}", key);
                    store.remove_entry(key.as_str());
                    store.stats.evictions_size += 1;
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, BackendError> {
        self.check_available()?;
        let mut store = self.store.write().await;

        let expired = store.entries.get(key).map(CacheEntry::is_expired);

        if expired.is_none() {
            debug!("Cache miss: {}", key);
            store.stats.misses += 1;
            return Ok(None);
        }

        if expired == Some(true) {
            debug!("Cache entry expired: {}", key);
            store.remove_entry(key.as_str());
            store.stats.misses += 1;
            store.stats.evictions_ttl += 1;
            store.refresh_stats();
            return Ok(None);
        }

        let response = match store.entries.get_mut(key) {
            Some(entry) => {
                entry.mark_accessed();
                entry.response.clone()
            }
            None => return Ok(None),
        };
        store.stats.hits += 1;

        if self.config.enable_lru_eviction {
            store.touch(key);
        }

        debug!("Cache hit: {}", key);
        Ok(Some(response))
    }

    async fn put(&self, response: CachedResponse, tags: Vec<String>) -> Result<(), BackendError> {
        self.check_available()?;
        let key = response.key.clone();
        let entry = CacheEntry::new(response, tags);
        let size = entry.metadata.size_bytes;

        // Rejected before touching the store so a replacement never loses the old entry
        if size > self.config.max_size_bytes {
            warn!(
                "Cannot cache entry of {} bytes, limit is {} bytes",
                size, self.config.max_size_bytes
            );
            return Err(BackendError::Other("Cache entry exceeds size limit".to_string()));
        }

        let mut store = self.store.write().await;

        if store.remove_entry(key.as_str()).is_some() {
            debug!("Updating existing cache entry: {}", key);
        } else {
            debug!("Inserting new cache entry: {}", key);
        }

        self.evict_if_needed(&mut store, size);

        for tag in &entry.metadata.tags {
            store
                .tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        store.entries.insert(key.clone(), entry);
        store.lru_queue.push_back(key);
        store.current_size_bytes += size;
        store.refresh_stats();

        Ok(())
    }

    async fn invalidate(
        &self,
        predicate: &InvalidationPredicate,
    ) -> Result<InvalidationEvent, BackendError> {
        self.check_available()?;
        let reason = predicate.reason();
        let lookup = predicate.index_lookup();

        if let IndexLookup::KeyPrefix(prefix) = &lookup {
            if prefix == &CacheKey::prefix_for("") {
                warn!("Refusing to invalidate with an empty signature prefix");
                return Ok(InvalidationEvent::new(reason, Vec::new()).with_context("empty prefix"));
            }
        }

        let mut store = self.store.write().await;
        let keys = store.matching_keys(&lookup);
        for key in &keys {
            store.remove_entry(key.as_str());
        }
        store.stats.invalidations += keys.len() as u64;
        store.refresh_stats();

        info!("Invalidated {} entries ({})", keys.len(), reason);
        Ok(InvalidationEvent::new(reason, keys))
    }
}

/// Background task for automatic cache cleanup
pub async fn start_auto_cleanup(cache: Arc<InMemoryCacheBackend>) {
    let interval = cache.config.cleanup_interval;

    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let events = cache.cleanup_expired().await;
        if !events.is_empty() {
            debug!("Auto cleanup: {} events", events.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::{provider_tag, CachePayload};
    use crate::fingerprint::{EpochStamps, FingerprintBuilder, QuerySignature};
    use crate::routing::{ProviderId, StrategyKind};
    use std::time::Duration;

    fn key(text: &str) -> CacheKey {
        FingerprintBuilder::new().build_key(
            &QuerySignature::new("vat", "question", text),
            &[],
            &EpochStamps::new(1, 1, 1, "1"),
            StrategyKind::CostOptimized,
        )
    }

    fn response(text: &str, ttl: Duration) -> CachedResponse {
        CachedResponse::from_payload(
            key(text),
            CachePayload::new(
                format!("answer to {}", text),
                ProviderId::new("haiku"),
                StrategyKind::CostOptimized,
            ),
            ttl,
        )
    }

    #[tokio::test]
    async fn test_basic_put_and_get() {
        let cache = InMemoryCacheBackend::new(CacheConfig::default());

        cache.put(response("q1", Duration::from_secs(60)), Vec::new()).await.unwrap();

        let value = cache.get(&key("q1")).await.unwrap().unwrap();
        assert_eq!(value.payload, "answer to q1");

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let cache = InMemoryCacheBackend::new(CacheConfig::default());
        cache.put(response("q1", Duration::from_millis(100)), Vec::new()).await.unwrap();

        assert!(cache.get(&key("q1")).await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get(&key("q1")).await.unwrap().is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.evictions_ttl, 1);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let config = CacheConfig::builder().max_entries(3).enable_lru_eviction(true).build();
        let cache = InMemoryCacheBackend::new(config);

        for text in ["q1", "q2", "q3"] {
            cache.put(response(text, Duration::from_secs(60)), Vec::new()).await.unwrap();
        }

        // q1 becomes most recently used, so q2 is evicted next
        assert!(cache.get(&key("q1")).await.unwrap().is_some());
        cache.put(response("q4", Duration::from_secs(60)), Vec::new()).await.unwrap();

        assert!(!cache.contains_key(&key("q2")).await);
        assert!(cache.contains_key(&key("q1")).await);
        assert!(cache.contains_key(&key("q4")).await);
        assert_eq!(cache.stats().await.evictions_size, 1);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_size_accounting() {
        let cache = InMemoryCacheBackend::new(CacheConfig::default());
        cache.put(response("q1", Duration::from_secs(60)), Vec::new()).await.unwrap();
        let size = cache.size_bytes().await;

        cache.put(response("q1", Duration::from_secs(60)), Vec::new()).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.size_bytes().await, size);
    }

    #[tokio::test]
    async fn test_oversized_entry_rejected() {
        let config = CacheConfig::builder().max_size_bytes(64).build();
        let cache = InMemoryCacheBackend::new(config);
        assert!(cache.put(response("q1", Duration::from_secs(60)), Vec::new()).await.is_err());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_replacement_keeps_previous_entry() {
        let config = CacheConfig::builder().max_size_bytes(4096).build();
        let cache = InMemoryCacheBackend::new(config);
        cache.put(response("q1", Duration::from_secs(60)), Vec::new()).await.unwrap();
        let size = cache.size_bytes().await;

        let oversized = CachedResponse::from_payload(
            key("q1"),
            CachePayload::new("x".repeat(8192), ProviderId::new("opus"), StrategyKind::Balanced),
            Duration::from_secs(60),
        );
        assert!(cache.put(oversized, Vec::new()).await.is_err());

        let kept = cache.get(&key("q1")).await.unwrap().unwrap();
        assert_eq!(kept.payload, "answer to q1");
        assert_eq!(cache.size_bytes().await, size);
    }

    #[tokio::test]
    async fn test_prefix_sweep() {
        let cache = InMemoryCacheBackend::new(CacheConfig::default());
        cache.put(response("q1", Duration::from_secs(60)), Vec::new()).await.unwrap();
        cache.put(response("q2", Duration::from_secs(60)), Vec::new()).await.unwrap();

        let q1 = key("q1");
        let event = cache
            .invalidate(&InvalidationPredicate::SignaturePrefix(q1.signature_hex().to_string()))
            .await
            .unwrap();

        assert_eq!(event.keys, vec![q1.clone()]);
        assert!(!cache.contains_key(&q1).await);
        assert!(cache.contains_key(&key("q2")).await);
    }

    #[tokio::test]
    async fn test_empty_prefix_removes_nothing() {
        let cache = InMemoryCacheBackend::new(CacheConfig::default());
        cache.put(response("q1", Duration::from_secs(60)), Vec::new()).await.unwrap();

        let event = cache
            .invalidate(&InvalidationPredicate::SignaturePrefix(String::new()))
            .await
            .unwrap();
        assert_eq!(event.count(), 0);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_tag_index_invalidation() {
        let cache = InMemoryCacheBackend::new(CacheConfig::default());
        let haiku = provider_tag(&ProviderId::new("haiku"));
        cache
            .put(
                response("q1", Duration::from_secs(60)),
                vec![haiku.clone(), "domain:vat".to_string()],
            )
            .await
            .unwrap();
        cache
            .put(response("q2", Duration::from_secs(60)), vec!["domain:vat".to_string()])
            .await
            .unwrap();

        let event = cache
            .invalidate(&InvalidationPredicate::Provider(ProviderId::new("haiku")))
            .await
            .unwrap();
        assert_eq!(event.count(), 1);

        let event = cache
            .invalidate(&InvalidationPredicate::Tag("domain:vat".to_string()))
            .await
            .unwrap();
        assert_eq!(event.keys, vec![key("q2")]);
        assert!(cache.is_empty().await);
        assert_eq!(cache.stats().await.invalidations, 2);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let cache = InMemoryCacheBackend::new(CacheConfig::default());
        cache.put(response("q1", Duration::from_millis(50)), Vec::new()).await.unwrap();
        cache.put(response("q2", Duration::from_millis(50)), Vec::new()).await.unwrap();
        cache.put(response("q3", Duration::from_secs(60)), Vec::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let events = cache.cleanup_expired().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].count(), 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let cache = InMemoryCacheBackend::new(CacheConfig::default());
        cache.set_available(false);
        assert!(cache.get(&key("q1")).await.is_err());
        assert!(cache.put(response("q1", Duration::from_secs(60)), Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = InMemoryCacheBackend::new(CacheConfig::default());
        cache.put(response("q1", Duration::from_secs(60)), Vec::new()).await.unwrap();
        cache.put(response("q2", Duration::from_secs(60)), Vec::new()).await.unwrap();

        let event = cache.clear().await;
        assert_eq!(event.count(), 2);
        assert!(cache.is_empty().await);
        assert!(cache.remove(&key("q1")).await.is_none());
    }
}
