//! Provider profiles and the provider catalog

use crate::routing::health::{HealthPolicy, ProviderHealth};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Stable provider identifier, e.g. "openai-gpt4o-mini"
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Answer quality class of a model, ordered from cheapest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Economy,
    Standard,
    Premium,
    Frontier,
}

impl QualityTier {
    /// Numeric weight used by the balanced strategy
    pub fn weight(&self) -> f64 {
        match self {
            QualityTier::Economy => 1.0,
            QualityTier::Standard => 2.0,
            QualityTier::Premium => 3.0,
            QualityTier::Frontier => 4.0,
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityTier::Economy => write!(f, "economy"),
            QualityTier::Standard => write!(f, "standard"),
            QualityTier::Premium => write!(f, "premium"),
            QualityTier::Frontier => write!(f, "frontier"),
        }
    }
}

/// One configured LLM provider/model
///
/// Pricing and tier are static configuration. The health handle is shared by every clone
/// of the profile so that the executor's observations are visible to the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: ProviderId,

    /// Upstream model name sent to the provider
    pub model: String,

    /// Price per token in the billing currency
    pub cost_per_token: f64,

    pub quality_tier: QualityTier,

    /// Observed p95 latency, used only to break routing ties
    #[serde(default)]
    pub p95_latency_ms: u64,

    #[serde(skip)]
    pub health: Arc<ProviderHealth>,
}

impl ProviderProfile {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        cost_per_token: f64,
        quality_tier: QualityTier,
    ) -> Self {
        Self {
            id: ProviderId::new(id),
            model: model.into(),
            cost_per_token,
            quality_tier,
            p95_latency_ms: 0,
            health: Arc::new(ProviderHealth::default()),
        }
    }

    pub fn with_p95_latency_ms(mut self, latency_ms: u64) -> Self {
        self.p95_latency_ms = latency_ms;
        self
    }

    pub fn with_health_policy(mut self, policy: HealthPolicy) -> Self {
        self.health = Arc::new(ProviderHealth::new(policy));
        self
    }
}

/// Provider configuration loaded from JSON
///
/// ```json
/// {
///   "primary": "anthropic-sonnet",
///   "providers": [
///     {"id": "anthropic-sonnet", "model": "claude-sonnet", "cost_per_token": 0.000015,
///      "quality_tier": "premium", "p95_latency_ms": 2400}
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCatalog {
    /// Provider used by the fixed-primary strategy
    #[serde(default)]
    pub primary: Option<ProviderId>,

    pub providers: Vec<ProviderProfile>,

    #[serde(default)]
    pub health: HealthPolicy,
}

impl ProviderCatalog {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let mut catalog: ProviderCatalog =
            serde_json::from_str(json).context("Failed to parse provider catalog")?;
        let policy = catalog.health.clone();
        for provider in &mut catalog.providers {
            provider.health = Arc::new(ProviderHealth::new(policy.clone()));
        }
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read provider catalog {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Invalid provider catalog {}", path.display()))
    }

    /// Validate the catalog
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            bail!("provider catalog is empty");
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.clone()) {
                bail!("duplicate provider id: {}", provider.id);
            }
            if !provider.cost_per_token.is_finite() || provider.cost_per_token < 0.0 {
                bail!("provider {} has invalid cost_per_token", provider.id);
            }
        }

        if let Some(primary) = &self.primary {
            if !seen.contains(primary) {
                bail!("primary provider {} is not in the catalog", primary);
            }
        }

        Ok(())
    }
}
