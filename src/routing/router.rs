//! Provider selection under a budget ceiling

use crate::error::RoutingError;
use crate::routing::cost::{CandidateQuery, CostEstimator, TokenCostEstimator};
use crate::routing::provider::{ProviderCatalog, ProviderId, ProviderProfile};
use crate::routing::strategy::{
    Balanced, CostOptimized, FixedPrimary, PricedCandidate, QualityOptimized, RoutingStrategy,
    StrategyKind,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one provider selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub strategy: StrategyKind,
    pub selected_provider: ProviderId,
    pub model: String,
    pub estimated_cost: f64,
    pub budget_ceiling: f64,
}

/// Chooses providers for a request and orders failover candidates
#[derive(Clone)]
pub struct ProviderRouter {
    providers: Vec<ProviderProfile>,
    primary: Option<ProviderId>,
    estimator: Arc<dyn CostEstimator>,
}

impl ProviderRouter {
    pub fn new(providers: Vec<ProviderProfile>) -> Self {
        info!("Initializing provider router with {} providers", providers.len());
        Self {
            providers,
            primary: None,
            estimator: Arc::new(TokenCostEstimator),
        }
    }

    pub fn from_catalog(catalog: ProviderCatalog) -> Self {
        let primary = catalog.primary.clone();
        let mut router = Self::new(catalog.providers);
        router.primary = primary;
        router
    }

    pub fn with_primary(mut self, primary: impl Into<String>) -> Self {
        self.primary = Some(ProviderId::new(primary));
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn CostEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn providers(&self) -> &[ProviderProfile] {
        &self.providers
    }

    pub fn provider(&self, id: &ProviderId) -> Option<&ProviderProfile> {
        self.providers.iter().find(|p| &p.id == id)
    }

    pub fn strategy(&self, kind: StrategyKind) -> Box<dyn RoutingStrategy> {
        match kind {
            StrategyKind::CostOptimized => Box::new(CostOptimized),
            StrategyKind::QualityOptimized => Box::new(QualityOptimized),
            StrategyKind::Balanced => Box::new(Balanced),
            StrategyKind::FixedPrimary => Box::new(FixedPrimary::new(self.primary.clone())),
        }
    }

    /// Every eligible provider in priority order, skipping `exclude`
    pub fn ranked(
        &self,
        kind: StrategyKind,
        query: &CandidateQuery,
        budget_ceiling: f64,
        exclude: &HashSet<ProviderId>,
    ) -> Result<Vec<RoutingDecision>, RoutingError> {
        let considered: Vec<&ProviderProfile> = self
            .providers
            .iter()
            .filter(|p| !exclude.contains(&p.id))
            .collect();

        let routable: Vec<&ProviderProfile> = considered
            .iter()
            .copied()
            .filter(|p| p.health.is_routable())
            .collect();

        if routable.is_empty() {
            return Err(RoutingError::NoHealthyProvider {
                candidates: considered.len(),
            });
        }

        let priced: Vec<PricedCandidate> = routable
            .into_iter()
            .map(|profile| PricedCandidate {
                estimated_cost: self.estimator.estimate(profile, query),
                profile: profile.clone(),
            })
            .collect();

        let cheapest_estimate = priced
            .iter()
            .map(|c| c.estimated_cost)
            .fold(f64::INFINITY, f64::min);

        let mut affordable: Vec<PricedCandidate> = priced
            .into_iter()
            .filter(|c| c.estimated_cost.is_finite() && c.estimated_cost <= budget_ceiling)
            .collect();

        if affordable.is_empty() {
            return Err(RoutingError::BudgetExceeded {
                budget_ceiling,
                cheapest_estimate,
            });
        }

        self.strategy(kind).rank(&mut affordable);

        Ok(affordable
            .into_iter()
            .map(|c| RoutingDecision {
                strategy: kind,
                selected_provider: c.profile.id,
                model: c.profile.model,
                estimated_cost: c.estimated_cost,
                budget_ceiling,
            })
            .collect())
    }

    /// Pick the first provider for a request
    pub fn select_provider(
        &self,
        kind: StrategyKind,
        query: &CandidateQuery,
        budget_ceiling: f64,
    ) -> Result<RoutingDecision, RoutingError> {
        let ranked = self
            .ranked(kind, query, budget_ceiling, &HashSet::new())
            .map_err(|e| {
                warn!("Routing failed for strategy {}: {}", kind, e);
                e
            })?;

        // ranked() never returns an empty list
        let decision = ranked.into_iter().next().ok_or(RoutingError::NoHealthyProvider {
            candidates: self.providers.len(),
        })?;

        debug!(
            "Selected provider {} ({}) for strategy {}, estimate {:.6} <= ceiling {:.6}",
            decision.selected_provider,
            decision.model,
            kind,
            decision.estimated_cost,
            budget_ceiling
        );
        Ok(decision)
    }

    /// Next provider after the ones already tried in this request
    pub fn get_failover(
        &self,
        kind: StrategyKind,
        query: &CandidateQuery,
        budget_ceiling: f64,
        tried: &HashSet<ProviderId>,
    ) -> Option<RoutingDecision> {
        match self.ranked(kind, query, budget_ceiling, tried) {
            Ok(ranked) => {
                let next = ranked.into_iter().next();
                if let Some(decision) = &next {
                    debug!(
                        "Failover to provider {} after {} tried",
                        decision.selected_provider,
                        tried.len()
                    );
                }
                next
            }
            Err(e) => {
                debug!("No failover candidate: {}", e);
                None
            }
        }
    }
}
