//! Freshness gate for high-confidence golden answers
//!
//! A golden answer is only served when the knowledge base has nothing newer that touches
//! it. Anything the gate cannot verify is unsafe.

use crate::error::BackendError;
use crate::fingerprint::QuerySignature;
use crate::golden::GoldenEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Knowledge base article as seen by the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbEntry {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Golden entry ids or tags this article contradicts
    #[serde(default)]
    pub conflicts_with: Vec<String>,
}

impl KbEntry {
    pub fn new(id: impl Into<String>, title: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            updated_at,
            tags: Vec::new(),
            conflicts_with: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn conflicting_with(mut self, target: impl Into<String>) -> Self {
        self.conflicts_with.push(target.into());
        self
    }
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Entries related to `signature` updated at or after `since`
    async fn fetch_recent(
        &self,
        signature: &QuerySignature,
        since: DateTime<Utc>,
    ) -> Result<Vec<KbEntry>, BackendError>;
}

/// In-process knowledge base
#[derive(Clone)]
pub struct InMemoryKnowledgeBase {
    entries: Arc<RwLock<Vec<KbEntry>>>,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryKnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub async fn insert(&self, entry: KbEntry) {
        let mut entries = self.entries.write().await;
        entries.retain(|existing| existing.id != entry.id);
        entries.push(entry);
    }

    pub fn set_available(&self, available: bool) {
        info!("Knowledge base availability set to {}", available);
        self.available.store(available, Ordering::Release);
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn fetch_recent(
        &self,
        _signature: &QuerySignature,
        since: DateTime<Utc>,
    ) -> Result<Vec<KbEntry>, BackendError> {
        if !self.available.load(Ordering::Acquire) {
            return Err(BackendError::Unavailable("knowledge base offline".to_string()));
        }
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|entry| entry.updated_at >= since)
            .cloned()
            .collect())
    }
}

/// Longest accepted freshness window (ten years)
pub const MAX_FRESHNESS_WINDOW: Duration = Duration::from_secs(3650 * 24 * 3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessConfig {
    /// How far back newer knowledge invalidates a golden answer
    pub window: Duration,

    pub lookup_timeout: Duration,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(14 * 24 * 3600),
            lookup_timeout: Duration::from_millis(500),
        }
    }
}

impl FreshnessConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.window.is_zero() {
            return Err("freshness window must be positive".to_string());
        }
        if self.window > MAX_FRESHNESS_WINDOW {
            return Err(format!(
                "freshness window must not exceed {} days",
                MAX_FRESHNESS_WINDOW.as_secs() / 86_400
            ));
        }
        if self.lookup_timeout.is_zero() {
            return Err("freshness lookup timeout must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum FreshnessVerdict {
    Safe,
    /// A newer related article was published inside the window
    Stale { kb_entry_id: String },
    /// An article explicitly contradicts the golden answer
    Conflict { kb_entry_id: String },
    /// The knowledge base could not be consulted
    Unverified { reason: String },
}

impl FreshnessVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, FreshnessVerdict::Safe)
    }
}

#[derive(Clone)]
pub struct FreshnessGate {
    kb: Arc<dyn KnowledgeBase>,
    config: FreshnessConfig,
}

impl FreshnessGate {
    pub fn new(kb: Arc<dyn KnowledgeBase>, config: FreshnessConfig) -> Self {
        Self { kb, config }
    }

    pub fn config(&self) -> &FreshnessConfig {
        &self.config
    }

    pub async fn is_safe(&self, entry: &GoldenEntry) -> bool {
        self.check(entry, Utc::now()).await.is_safe()
    }

    pub async fn check(&self, entry: &GoldenEntry, now: DateTime<Utc>) -> FreshnessVerdict {
        let since = match chrono::Duration::from_std(self.config.window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
        {
            Some(since) => since,
            None => {
                warn!(
                    "Freshness window {:?} is out of range for {}",
                    self.config.window, now
                );
                return FreshnessVerdict::Unverified {
                    reason: "freshness window out of range".to_string(),
                };
            }
        };

        let timeout_ms = self.config.lookup_timeout.as_millis() as u64;
        let fetched = match timeout(
            self.config.lookup_timeout,
            self.kb.fetch_recent(&entry.signature, since),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::timeout(timeout_ms, "knowledge base fetch_recent")),
        };

        let recent = match fetched {
            Ok(recent) => recent,
            Err(e) => {
                warn!("Freshness of golden entry {} unverified: {}", entry.id, e);
                return FreshnessVerdict::Unverified {
                    reason: e.to_string(),
                };
            }
        };

        let golden_tags: HashSet<String> = entry.tags.iter().map(|t| normalize(t)).collect();

        if let Some(conflict) = recent.iter().find(|kb| {
            kb.conflicts_with.iter().any(|target| {
                target.trim() == entry.id || golden_tags.contains(&normalize(target))
            })
        }) {
            info!("Golden entry {} conflicts with KB entry {}", entry.id, conflict.id);
            return FreshnessVerdict::Conflict {
                kb_entry_id: conflict.id.clone(),
            };
        }

        if let Some(newer) = recent.iter().find(|kb| {
            kb.updated_at > entry.published_at
                && kb.updated_at >= since
                && kb.tags.iter().any(|t| golden_tags.contains(&normalize(t)))
        }) {
            info!(
                "Golden entry {} is stale: KB entry {} updated {}",
                entry.id, newer.id, newer.updated_at
            );
            return FreshnessVerdict::Stale {
                kb_entry_id: newer.id.clone(),
            };
        }

        debug!("Golden entry {} is fresh ({} recent KB entries)", entry.id, recent.len());
        FreshnessVerdict::Safe
    }
}

fn normalize(tag: &str) -> String {
    tag.trim().to_lowercase()
}
