//! # Response Cache
//!
//! Computed answers keyed by [`crate::fingerprint::CacheKey`].
//!
//! ## Features
//!
//! - **TTL-Based Expiration**: per-strategy TTLs with jitter, shorter for cost-optimized answers
//! - **Advisory Access**: backend errors and timeouts read as a miss and never fail a request
//! - **Index-Backed Invalidation**: signature-prefix range sweeps and a tag index for tag,
//!   provider and strategy predicates
//! - **LRU Eviction**: entry-count and byte limits in the in-memory backend
//! - **Request Coalescing**: one upstream computation per key in flight
//!
//! ## Example
//!
//! ```rust,no_run
//! use answer_resolver::cache::{CacheConfig, CachePayload, InMemoryCacheBackend, ResponseCache};
//! use answer_resolver::fingerprint::{EpochStamps, FingerprintBuilder, QuerySignature};
//! use answer_resolver::routing::{ProviderId, StrategyKind};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let config = CacheConfig::builder()
//!     .default_ttl(Duration::from_secs(3600))
//!     .max_entries(10_000)
//!     .build();
//!
//! let backend = Arc::new(InMemoryCacheBackend::new(config.clone()));
//! let cache = ResponseCache::new(backend, config);
//!
//! let signature = QuerySignature::new("vat", "filing_deadline", "When is the Q1 VAT return due?");
//! let key = FingerprintBuilder::new().build_key(
//!     &signature,
//!     &[],
//!     &EpochStamps::new(5, 3, 1, "2"),
//!     StrategyKind::CostOptimized,
//! );
//!
//! let payload =
//!     CachePayload::new("April 30", ProviderId::new("haiku"), StrategyKind::CostOptimized);
//! cache.put(key.clone(), payload, None).await;
//!
//! if let Some(hit) = cache.get(&key).await {
//!     println!("Cache hit: {}", hit.payload);
//! }
//! # }
//! ```

pub mod coalesce;
pub mod config;
pub mod entry;
pub mod invalidation;
pub mod response;
pub mod store;
pub mod types;

pub use coalesce::{FlightError, FlightRole, RequestCoalescer};
pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{CacheEntry, CacheMetadata};
pub use invalidation::{InvalidationEvent, InvalidationPredicate, InvalidationReason};
pub use response::ResponseCache;
pub use store::{start_auto_cleanup, CacheBackend, InMemoryCacheBackend};
pub use types::{CachePayload, CacheStats, CachedResponse};
