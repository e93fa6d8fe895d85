//! Provider routing: profiles, health, cost estimation and strategy-based selection

pub mod cost;
pub mod health;
pub mod provider;
pub mod router;
pub mod strategy;

pub use cost::{CandidateQuery, CostEstimator, TokenCostEstimator};
pub use health::{AvailabilityState, HealthPolicy, ProviderHealth};
pub use provider::{ProviderCatalog, ProviderId, ProviderProfile, QualityTier};
pub use router::{ProviderRouter, RoutingDecision};
pub use strategy::{
    Balanced, CostOptimized, FixedPrimary, PricedCandidate, QualityOptimized, RoutingStrategy,
    StrategyKind,
};
