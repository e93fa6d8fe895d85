//! Request and answer types exchanged with the API layer

use crate::executor::Environment;
use crate::fingerprint::{AttachmentFingerprint, CacheKey, QuerySignature};
use crate::routing::{ProviderId, StrategyKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source reference attached to an answer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub source_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Citation {
    pub fn new(source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title: title.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Where a resolved answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Golden,
    Cache,
    Provider,
}

/// Query as handed over by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedQuery {
    pub signature: QuerySignature,

    #[serde(default)]
    pub attachment_hashes: Vec<AttachmentFingerprint>,

    #[serde(default)]
    pub routing_strategy: StrategyKind,

    /// Maximum estimated cost of the provider call
    pub budget_ceiling: f64,

    #[serde(default)]
    pub environment: Environment,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_max_output_tokens() -> u32 {
    1024
}

impl ClassifiedQuery {
    pub fn new(signature: QuerySignature, budget_ceiling: f64) -> Self {
        Self {
            signature,
            attachment_hashes: Vec::new(),
            routing_strategy: StrategyKind::default(),
            budget_ceiling,
            environment: Environment::default(),
            max_output_tokens: default_max_output_tokens(),
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentFingerprint) -> Self {
        self.attachment_hashes.push(attachment);
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.routing_strategy = strategy;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// Successful resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAnswer {
    pub resolution_id: Uuid,
    pub source: AnswerSource,
    pub payload: String,
    pub citations: Vec<Citation>,
    pub provider_used: Option<ProviderId>,
    pub cache_key_used: Option<CacheKey>,
    pub golden_entry_id: Option<String>,
    /// Provider attempts made by this request; zero for golden and cache answers
    pub attempts: u32,
    pub latency_ms: u64,
}
