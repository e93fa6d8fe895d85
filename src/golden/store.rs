//! Read access to the golden set

use crate::error::BackendError;
use crate::fingerprint::{FingerprintBuilder, QuerySignature, SignatureDigest};
use crate::golden::entry::GoldenEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[async_trait]
pub trait GoldenStore: Send + Sync {
    /// Published entry whose signature digest equals `digest`
    async fn get_by_digest(
        &self,
        digest: &SignatureDigest,
    ) -> Result<Option<GoldenEntry>, BackendError>;

    /// Published entries that may answer `signature`; backends may pre-filter by domain
    async fn published_entries(
        &self,
        signature: &QuerySignature,
    ) -> Result<Vec<GoldenEntry>, BackendError>;
}

#[derive(Default)]
struct GoldenIndex {
    entries: HashMap<String, GoldenEntry>,
    by_digest: HashMap<SignatureDigest, String>,
}

/// In-process golden set, indexed by entry id and signature digest
#[derive(Clone)]
pub struct InMemoryGoldenStore {
    index: Arc<RwLock<GoldenIndex>>,
    available: Arc<AtomicBool>,
    fingerprints: FingerprintBuilder,
}

impl Default for InMemoryGoldenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGoldenStore {
    pub fn new() -> Self {
        Self {
            index: Arc::new(RwLock::new(GoldenIndex::default())),
            available: Arc::new(AtomicBool::new(true)),
            fingerprints: FingerprintBuilder::new(),
        }
    }

    /// Insert or replace an entry by id
    pub async fn insert(&self, entry: GoldenEntry) {
        let digest = self.fingerprints.signature_digest(&entry.signature);
        let mut index = self.index.write().await;

        if let Some(previous) = index.entries.get(&entry.id) {
            let previous_digest = self.fingerprints.signature_digest(&previous.signature);
            if index.by_digest.get(&previous_digest) == Some(&entry.id) {
                index.by_digest.remove(&previous_digest);
            }
        }

        debug!("Golden entry {} v{} stored ({})", entry.id, entry.version, entry.status);
        if entry.is_servable() {
            index.by_digest.insert(digest, entry.id.clone());
        }
        index.entries.insert(entry.id.clone(), entry);
    }

    pub async fn remove(&self, id: &str) -> Option<GoldenEntry> {
        let mut index = self.index.write().await;
        let removed = index.entries.remove(id)?;
        let digest = self.fingerprints.signature_digest(&removed.signature);
        if index.by_digest.get(&digest).map(String::as_str) == Some(id) {
            index.by_digest.remove(&digest);
        }
        Some(removed)
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Simulate an outage of the backing store
    pub fn set_available(&self, available: bool) {
        info!("Golden store availability set to {}", available);
        self.available.store(available, Ordering::Release);
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("golden store offline".to_string()))
        }
    }
}

#[async_trait]
impl GoldenStore for InMemoryGoldenStore {
    async fn get_by_digest(
        &self,
        digest: &SignatureDigest,
    ) -> Result<Option<GoldenEntry>, BackendError> {
        self.check_available()?;
        let index = self.index.read().await;
        Ok(index
            .by_digest
            .get(digest)
            .and_then(|id| index.entries.get(id))
            .filter(|entry| entry.is_servable())
            .cloned())
    }

    async fn published_entries(
        &self,
        signature: &QuerySignature,
    ) -> Result<Vec<GoldenEntry>, BackendError> {
        self.check_available()?;
        let domain = signature.canonical_domain();
        let index = self.index.read().await;
        Ok(index
            .entries
            .values()
            .filter(|entry| entry.is_servable() && entry.signature.canonical_domain() == domain)
            .cloned()
            .collect())
    }
}
