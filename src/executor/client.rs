//! Model client seam

use crate::error::ProviderCallError;
use crate::routing::ProviderProfile;
use crate::types::Citation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Provider-independent completion request; identical for every attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub domain: String,
    pub prompt: String,
    pub max_output_tokens: u32,
}

impl ModelRequest {
    pub fn new(
        domain: impl Into<String>,
        prompt: impl Into<String>,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            domain: domain.into(),
            prompt: prompt.into(),
            max_output_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub tokens_used: Option<u32>,
}

impl ModelResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
            tokens_used: None,
        }
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }
}

/// Upstream LLM transport
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        provider: &ProviderProfile,
        request: &ModelRequest,
    ) -> Result<ModelResponse, ProviderCallError>;
}
