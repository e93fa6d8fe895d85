//! Upstream model call with retry and failover
//!
//! [`CallExecutor`] drives a [`RetryState`] against the router: every failed attempt
//! records provider health, asks the router for the next untried candidate and re-sends
//! the unchanged request.

pub mod client;
pub mod retry;

pub use client::{ModelClient, ModelRequest, ModelResponse};
pub use retry::{AttemptError, CallPhase, Environment, RetryPolicy, RetryState};

use crate::error::{CallErrorKind, ProviderCallError, UpstreamFailure};
use crate::routing::{CandidateQuery, ProviderId, ProviderRouter, RoutingDecision, StrategyKind};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Routing inputs that stay fixed across the attempts of one request
#[derive(Debug, Clone, PartialEq)]
pub struct CallPlan {
    pub strategy: StrategyKind,
    pub query: CandidateQuery,
    pub budget_ceiling: f64,
    pub environment: Environment,
}

/// Successful call sequence
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub response: ModelResponse,
    pub decision: RoutingDecision,
    pub attempts: u32,
    pub tried: Vec<ProviderId>,
}

#[derive(Clone)]
pub struct CallExecutor {
    client: Arc<dyn ModelClient>,
    router: Arc<ProviderRouter>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl CallExecutor {
    pub fn new(
        client: Arc<dyn ModelClient>,
        router: Arc<ProviderRouter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            router,
            policy,
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    /// Run the call sequence starting at `first`
    pub async fn execute(
        &self,
        request: Arc<ModelRequest>,
        plan: &CallPlan,
        first: RoutingDecision,
    ) -> Result<CallOutcome, UpstreamFailure> {
        let mut state = RetryState::new(self.policy.max_attempts, plan.environment);
        let mut tried: Vec<ProviderId> = Vec::new();
        let mut tried_set: HashSet<ProviderId> = HashSet::new();
        let mut decision = first;

        loop {
            state = state.begin_attempt();
            let provider_id = decision.selected_provider.clone();
            tried.push(provider_id.clone());
            tried_set.insert(provider_id.clone());

            debug!(
                "Attempt {}/{} on provider {} (final: {})",
                state.attempt_count + 1,
                state.max_attempts,
                provider_id,
                state.is_final_attempt
            );

            match self.attempt(&provider_id, &request).await {
                Ok(response) => {
                    state = state.on_success();
                    return Ok(CallOutcome {
                        response,
                        decision,
                        attempts: state.attempt_count,
                        tried,
                    });
                }
                Err(call_error) => {
                    warn!(
                        "Provider {} failed on attempt {}: {}",
                        provider_id,
                        state.attempt_count + 1,
                        call_error
                    );
                    state = state.on_failure(AttemptError::new(provider_id, call_error));
                }
            }

            if state.phase == CallPhase::Retrying {
                match self.router.get_failover(
                    plan.strategy,
                    &plan.query,
                    plan.budget_ceiling,
                    &tried_set,
                ) {
                    Some(next) => {
                        let delay = self.policy.backoff_for(state.attempt_count);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        decision = next;
                        continue;
                    }
                    None => state = state.on_no_failover(),
                }
            }

            if let Some(failure) = state.failure() {
                error!("Upstream call sequence failed: {}", failure);
                return Err(failure);
            }
        }
    }

    /// One call with the provider timeout; health is recorded on every outcome
    async fn attempt(
        &self,
        provider_id: &ProviderId,
        request: &ModelRequest,
    ) -> Result<ModelResponse, ProviderCallError> {
        let Some(profile) = self.router.provider(provider_id) else {
            return Err(ProviderCallError::new(
                CallErrorKind::Internal,
                format!("provider {} is not configured", provider_id),
            ));
        };

        let call = self.client.complete(profile, request);
        let result = match timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderCallError::timeout(self.call_timeout.as_millis() as u64)),
        };

        match &result {
            Ok(_) => profile.health.record_success(),
            Err(_) => profile.health.record_failure(),
        }
        result
    }
}
