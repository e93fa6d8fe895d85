//! Cache entry management with TTL support

use crate::cache::types::CachedResponse;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A stored response with expiry and access metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: CachedResponse,
    pub metadata: CacheMetadata,
}

#[derive(Debug, Clone)]
pub struct CacheMetadata {
    /// Last access time (for LRU tracking)
    pub accessed_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    pub access_count: u64,

    pub size_bytes: usize,

    /// Index tags, including the reserved provider and strategy tags
    pub tags: Vec<String>,
}

impl CacheEntry {
    pub fn new(response: CachedResponse, tags: Vec<String>) -> Self {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(response.ttl).unwrap_or(chrono::Duration::seconds(3600));
        let size_bytes = response.approximate_size()
            + tags.iter().map(String::len).sum::<usize>()
            + std::mem::size_of::<CacheMetadata>();

        let mut unique_tags: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !unique_tags.contains(&tag) {
                unique_tags.push(tag);
            }
        }

        Self {
            response,
            metadata: CacheMetadata {
                accessed_at: now,
                expires_at,
                access_count: 0,
                size_bytes,
                tags: unique_tags,
            },
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.metadata.expires_at
    }

    pub fn time_until_expiration(&self) -> Option<Duration> {
        (self.metadata.expires_at - Utc::now()).to_std().ok()
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Utc::now();
        self.metadata.access_count += 1;
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.iter().any(|t| t == tag)
    }
}
