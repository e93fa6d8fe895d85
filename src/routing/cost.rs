//! Cost estimation seam
//!
//! The router never prices requests itself. It asks a [`CostEstimator`] for one estimate
//! per provider and only compares the results.

use crate::routing::provider::ProviderProfile;
use serde::{Deserialize, Serialize};

/// Rough characters-per-token ratio for the text heuristic
const CHARS_PER_TOKEN: usize = 4;

/// Token-count estimate of the request being routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub prompt_tokens: u32,
    pub max_output_tokens: u32,
}

impl CandidateQuery {
    pub fn new(prompt_tokens: u32, max_output_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            max_output_tokens,
        }
    }

    /// Estimate prompt tokens from text length
    pub fn from_text(prompt: &str, max_output_tokens: u32) -> Self {
        let chars = prompt.chars().count();
        let tokens = (chars + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN;
        Self::new(tokens.min(u32::MAX as usize) as u32, max_output_tokens)
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens as u64 + self.max_output_tokens as u64
    }
}

/// External pricing collaborator
pub trait CostEstimator: Send + Sync {
    fn estimate(&self, provider: &ProviderProfile, query: &CandidateQuery) -> f64;
}

/// Worst-case cost: every prompt and output token billed at the provider's rate
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCostEstimator;

impl CostEstimator for TokenCostEstimator {
    fn estimate(&self, provider: &ProviderProfile, query: &CandidateQuery) -> f64 {
        query.total_tokens() as f64 * provider.cost_per_token
    }
}
