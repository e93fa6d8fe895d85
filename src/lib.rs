//! # answer-resolver
//!
//! Query resolution and response caching for classified user queries.
//!
//! ## Features
//!
//! - Golden-set fast path with exact-then-semantic matching
//! - Freshness gate against newer knowledge-base entries
//! - Deterministic cache keys scoped by dataset epochs
//! - Advisory response cache with TTLs, prefix/tag invalidation and request coalescing
//! - Budget-aware provider routing with pluggable strategies and circuit-style health
//! - Explicit retry/failover state machine with production fail-fast
//!
//! ## Resolving a Query
//!
//! Answers come from the first tier that can serve them: golden set, cache, provider.
//!
//! ```no_run
//! use answer_resolver::executor::{ModelClient, ModelRequest, ModelResponse};
//! use answer_resolver::error::ProviderCallError;
//! use answer_resolver::routing::{ProviderProfile, ProviderRouter, QualityTier};
//! use answer_resolver::{ClassifiedQuery, QuerySignature, ResolutionOrchestrator};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct MyClient;
//!
//! #[async_trait]
//! impl ModelClient for MyClient {
//!     async fn complete(
//!         &self,
//!         _provider: &ProviderProfile,
//!         request: &ModelRequest,
//!     ) -> Result<ModelResponse, ProviderCallError> {
//!         Ok(ModelResponse::new(format!("answer to {}", request.prompt)))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     answer_resolver::telemetry::init_tracing();
//!
//!     let router = ProviderRouter::new(vec![
//!         ProviderProfile::new("haiku", "claude-haiku", 0.000_001, QualityTier::Economy),
//!         ProviderProfile::new("opus", "claude-opus", 0.000_075, QualityTier::Frontier),
//!     ]);
//!
//!     let resolver = ResolutionOrchestrator::builder()
//!         .model_client(Arc::new(MyClient))
//!         .router(router)
//!         .build()?;
//!
//!     let query = ClassifiedQuery::new(
//!         QuerySignature::new("vat", "filing_deadline", "When is the Q1 VAT return due?"),
//!         0.05,
//!     );
//!     let answer = resolver.resolve(&query).await?;
//!     println!("{:?}: {}", answer.source, answer.payload);
//!     Ok(())
//! }
//! ```
//!
//! ## Provider Catalog
//!
//! Provider profiles are configuration:
//!
//! ```no_run
//! use answer_resolver::routing::{ProviderCatalog, ProviderRouter};
//!
//! fn main() -> anyhow::Result<()> {
//!     let catalog = ProviderCatalog::load("providers.json")?;
//!     let router = ProviderRouter::from_catalog(catalog);
//!     println!("{} providers", router.providers().len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod epochs;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod freshness;
pub mod golden;
pub mod orchestrator;
pub mod routing;
pub mod telemetry;
pub mod types;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheConfigBuilder, InvalidationPredicate, ResponseCache};
pub use config::{ResolverConfig, ResolverConfigBuilder};
pub use epochs::{EpochSource, StaticEpochs};
pub use error::{ResolveError, Result, UpstreamFailure};
pub use executor::{Environment, RetryPolicy};
pub use fingerprint::{
    AttachmentFingerprint, CacheKey, EpochStamps, FactValue, FingerprintBuilder, QuerySignature,
};
pub use orchestrator::{OrchestratorBuilder, ResolutionOrchestrator};
pub use routing::{ProviderRouter, StrategyKind};
pub use types::{AnswerSource, Citation, ClassifiedQuery, ResolvedAnswer};
