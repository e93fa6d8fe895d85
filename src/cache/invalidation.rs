//! Cache invalidation predicates and events
//!
//! Dataset changes never need explicit invalidation: epoch stamps are part of every key.
//! Predicates cover the remaining cases (golden publish, provider incidents, strategy
//! retuning) and each resolves through an index, never a full scan.

use crate::cache::types::{provider_tag, strategy_tag};
use crate::fingerprint::CacheKey;
use crate::routing::{ProviderId, StrategyKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which entries an `invalidate` call removes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum InvalidationPredicate {
    /// Hex prefix of the signature digest (ordered-key range sweep)
    SignaturePrefix(String),
    Tag(String),
    Provider(ProviderId),
    Strategy(StrategyKind),
}

impl InvalidationPredicate {
    /// Key-space prefix for `SignaturePrefix`, tag for the index-backed predicates
    pub fn index_lookup(&self) -> IndexLookup {
        match self {
            InvalidationPredicate::SignaturePrefix(prefix) => {
                IndexLookup::KeyPrefix(CacheKey::prefix_for(prefix))
            }
            InvalidationPredicate::Tag(tag) => IndexLookup::Tag(tag.clone()),
            InvalidationPredicate::Provider(id) => IndexLookup::Tag(provider_tag(id)),
            InvalidationPredicate::Strategy(kind) => IndexLookup::Tag(strategy_tag(*kind)),
        }
    }

    pub fn reason(&self) -> InvalidationReason {
        match self {
            InvalidationPredicate::SignaturePrefix(prefix) => InvalidationReason::SignaturePrefix {
                prefix: prefix.clone(),
            },
            InvalidationPredicate::Tag(tag) => InvalidationReason::TagMatch { tag: tag.clone() },
            InvalidationPredicate::Provider(id) => {
                InvalidationReason::ProviderMatch { provider: id.clone() }
            }
            InvalidationPredicate::Strategy(kind) => {
                InvalidationReason::StrategyMatch { strategy: *kind }
            }
        }
    }
}

/// Index used to resolve a predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLookup {
    KeyPrefix(String),
    Tag(String),
}

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry expired based on TTL
    Expired,

    /// Manual removal by key or clear
    Manual,

    /// Evicted by the entry or byte limit
    SizeLimit,

    SignaturePrefix { prefix: String },

    TagMatch { tag: String },

    ProviderMatch { provider: ProviderId },

    StrategyMatch { strategy: StrategyKind },
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::SizeLimit => write!(f, "cache size limit reached"),
            InvalidationReason::SignaturePrefix { prefix } => {
                write!(f, "signature prefix: {}", prefix)
            }
            InvalidationReason::TagMatch { tag } => write!(f, "tag match: {}", tag),
            InvalidationReason::ProviderMatch { provider } => write!(f, "provider: {}", provider),
            InvalidationReason::StrategyMatch { strategy } => write!(f, "strategy: {}", strategy),
        }
    }
}

/// Event for cache invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<CacheKey>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    pub fn new(reason: InvalidationReason, keys: Vec<CacheKey>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }
}
