//! Routing strategies
//!
//! A strategy only orders candidates. Health and budget filtering happen in the router
//! before ranking, so every strategy sees operational, affordable providers only.

use crate::routing::provider::{ProviderId, ProviderProfile};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Identifier of a routing strategy; part of every cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    CostOptimized,
    QualityOptimized,
    Balanced,
    FixedPrimary,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::CostOptimized,
        StrategyKind::QualityOptimized,
        StrategyKind::Balanced,
        StrategyKind::FixedPrimary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::CostOptimized => "cost_optimized",
            StrategyKind::QualityOptimized => "quality_optimized",
            StrategyKind::Balanced => "balanced",
            StrategyKind::FixedPrimary => "fixed_primary",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cost_optimized" | "cost" => Ok(StrategyKind::CostOptimized),
            "quality_optimized" | "quality" => Ok(StrategyKind::QualityOptimized),
            "balanced" => Ok(StrategyKind::Balanced),
            "fixed_primary" | "fixed" => Ok(StrategyKind::FixedPrimary),
            other => Err(format!("unknown routing strategy: {}", other)),
        }
    }
}

/// Provider paired with its cost estimate for the current request
#[derive(Debug, Clone)]
pub struct PricedCandidate {
    pub profile: ProviderProfile,
    pub estimated_cost: f64,
}

impl PricedCandidate {
    pub fn id(&self) -> &ProviderId {
        &self.profile.id
    }
}

/// Orders affordable, operational candidates from most to least preferred
pub trait RoutingStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn rank(&self, candidates: &mut [PricedCandidate]);
}

/// Lowest `cost_per_token` first; the estimate only decides affordability
#[derive(Debug, Clone, Copy, Default)]
pub struct CostOptimized;

impl RoutingStrategy for CostOptimized {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CostOptimized
    }

    fn rank(&self, candidates: &mut [PricedCandidate]) {
        candidates.sort_by(|a, b| {
            compare_metric(a.profile.cost_per_token, b.profile.cost_per_token)
                .then_with(|| tie_break(a, b))
        });
    }
}

/// Highest quality tier first
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityOptimized;

impl RoutingStrategy for QualityOptimized {
    fn kind(&self) -> StrategyKind {
        StrategyKind::QualityOptimized
    }

    fn rank(&self, candidates: &mut [PricedCandidate]) {
        candidates.sort_by(|a, b| {
            b.profile
                .quality_tier
                .cmp(&a.profile.quality_tier)
                .then_with(|| tie_break(a, b))
        });
    }
}

/// Highest quality per unit price first
#[derive(Debug, Clone, Copy, Default)]
pub struct Balanced;

impl Balanced {
    /// Free providers rank above every priced one
    pub fn value(profile: &ProviderProfile) -> f64 {
        if profile.cost_per_token <= 0.0 {
            f64::INFINITY
        } else {
            profile.quality_tier.weight() / profile.cost_per_token
        }
    }
}

impl RoutingStrategy for Balanced {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Balanced
    }

    fn rank(&self, candidates: &mut [PricedCandidate]) {
        candidates.sort_by(|a, b| {
            compare_metric(Self::value(&b.profile), Self::value(&a.profile))
                .then_with(|| tie_break(a, b))
        });
    }
}

/// Configured primary first, remaining providers in cost order
#[derive(Debug, Clone, Default)]
pub struct FixedPrimary {
    pub primary: Option<ProviderId>,
}

impl FixedPrimary {
    pub fn new(primary: Option<ProviderId>) -> Self {
        Self { primary }
    }
}

impl RoutingStrategy for FixedPrimary {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FixedPrimary
    }

    fn rank(&self, candidates: &mut [PricedCandidate]) {
        CostOptimized.rank(candidates);

        match &self.primary {
            Some(primary) => {
                if let Some(position) = candidates.iter().position(|c| c.id() == primary) {
                    candidates[..=position].rotate_right(1);
                }
            }
            None => warn!("fixed_primary strategy without a configured primary; using cost order"),
        }
    }
}

fn compare_metric(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Equal metric: lower p95 latency, then lexicographically smaller id
fn tie_break(a: &PricedCandidate, b: &PricedCandidate) -> Ordering {
    a.profile
        .p95_latency_ms
        .cmp(&b.profile.p95_latency_ms)
        .then_with(|| a.id().cmp(b.id()))
}
