//! Resolution pipeline entry point
//!
//! Priority order for every query: golden set (when fresh), response cache, provider.
//! Golden, cache and epoch failures degrade to the next tier; only routing and upstream
//! failures reach the caller.

use crate::cache::{
    start_auto_cleanup, CacheBackend, CachePayload, CachedResponse, FlightError,
    InMemoryCacheBackend, InvalidationPredicate, RequestCoalescer, ResponseCache,
};
use crate::config::ResolverConfig;
use crate::epochs::{EpochSource, StaticEpochs};
use crate::error::{
    BackendError, CallErrorKind, FailureCause, ResolveError, Result, UpstreamFailure,
};
use crate::executor::{CallExecutor, CallPlan, ModelClient, ModelRequest};
use crate::fingerprint::{CacheKey, FingerprintBuilder, QuerySignature};
use crate::freshness::{FreshnessGate, InMemoryKnowledgeBase, KnowledgeBase};
use crate::golden::{
    GoldenMatch, GoldenSetMatcher, GoldenStore, InMemoryGoldenStore, SimilarityScorer,
};
use crate::routing::{CandidateQuery, ProviderId, ProviderRouter, RoutingDecision, StrategyKind};
use crate::types::{AnswerSource, Citation, ClassifiedQuery, ResolvedAnswer};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::AbortHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Result of one coalesced computation, shared by every requester of the key
#[derive(Debug, Clone, PartialEq)]
struct FlightAnswer {
    source: AnswerSource,
    payload: String,
    citations: Vec<Citation>,
    provider_used: ProviderId,
    attempts: u32,
}

impl FlightAnswer {
    fn from_cache(hit: CachedResponse) -> Self {
        Self {
            source: AnswerSource::Cache,
            payload: hit.payload,
            citations: hit.citations,
            provider_used: hit.provider_used,
            attempts: 0,
        }
    }
}

type FlightResult = std::result::Result<FlightAnswer, ResolveError>;

pub struct ResolutionOrchestrator {
    golden: GoldenSetMatcher,
    freshness: FreshnessGate,
    cache: ResponseCache,
    router: Arc<ProviderRouter>,
    executor: CallExecutor,
    epochs: Arc<dyn EpochSource>,
    flights: RequestCoalescer<FlightResult>,
    fingerprints: FingerprintBuilder,
    config: ResolverConfig,
    cleanup: Option<AbortHandle>,
}

impl ResolutionOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    /// Keys with a provider computation in flight
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Resolve a classified query into an answer or one structured failure
    pub async fn resolve(&self, query: &ClassifiedQuery) -> Result<ResolvedAnswer> {
        let resolution_id = Uuid::new_v4();
        let span = info_span!(
            "resolve",
            resolution_id = %resolution_id,
            strategy = %query.routing_strategy,
            domain = %query.signature.domain,
        );
        self.resolve_in_span(resolution_id, query).instrument(span).await
    }

    async fn resolve_in_span(
        &self,
        resolution_id: Uuid,
        query: &ClassifiedQuery,
    ) -> Result<ResolvedAnswer> {
        let started = Instant::now();
        let key = self.cache_key(query).await;

        let speculative = key
            .as_ref()
            .filter(|_| self.config.speculative_cache_lookup);
        let (golden, prefetched) = match speculative {
            Some(key) => {
                let (golden, cached) = tokio::join!(
                    self.golden.match_signature(&query.signature),
                    self.cache.get(key)
                );
                (golden, Some(cached))
            }
            None => (self.golden.match_signature(&query.signature).await, None),
        };

        if let Some(found) = golden {
            if self.golden_servable(&found).await {
                info!("Serving golden entry {} (score {:.4})", found.entry.id, found.score);
                return Ok(ResolvedAnswer {
                    resolution_id,
                    source: AnswerSource::Golden,
                    payload: found.entry.answer_text,
                    citations: found.entry.citations,
                    provider_used: None,
                    cache_key_used: None,
                    golden_entry_id: Some(found.entry.id),
                    attempts: 0,
                    latency_ms: elapsed_ms(started),
                });
            }
        }

        let cached = match (prefetched, key.as_ref()) {
            (Some(cached), _) => cached,
            (None, Some(key)) => self.cache.get(key).await,
            (None, None) => None,
        };

        if let Some(hit) = cached {
            debug!("Cache hit {}", hit.key);
            return Ok(ResolvedAnswer {
                resolution_id,
                source: AnswerSource::Cache,
                payload: hit.payload,
                citations: hit.citations,
                provider_used: Some(hit.provider_used),
                cache_key_used: Some(hit.key),
                golden_entry_id: None,
                attempts: 0,
                latency_ms: elapsed_ms(started),
            });
        }

        let candidate = CandidateQuery::from_text(&query.signature.text, query.max_output_tokens);
        let first =
            self.router
                .select_provider(query.routing_strategy, &candidate, query.budget_ceiling)?;
        let plan = CallPlan {
            strategy: query.routing_strategy,
            query: candidate,
            budget_ceiling: query.budget_ceiling,
            environment: self.config.environment.strictest(query.environment),
        };
        let request = Arc::new(ModelRequest::new(
            query.signature.canonical_domain(),
            query.signature.text.clone(),
            query.max_output_tokens,
        ));

        let answer = match key.clone() {
            Some(key) => {
                let first_provider = first.selected_provider.clone();
                let flight = Flight {
                    cache: self.cache.clone(),
                    executor: self.executor.clone(),
                    key: key.clone(),
                    domain_tag: domain_tag(&query.signature),
                    request,
                    plan,
                    first,
                };
                let (result, role) = self.flights.run(&key, move || flight.compute()).await;
                debug!("Flight for {} finished as {:?}", key, role);
                result.map_err(|e| interrupted_flight(e, &key, first_provider))??
            }
            None => {
                debug!("Cache bypassed, calling provider directly");
                let outcome = self.executor.execute(request, &plan, first).await?;
                FlightAnswer {
                    source: AnswerSource::Provider,
                    payload: outcome.response.text,
                    citations: outcome.response.citations,
                    provider_used: outcome.decision.selected_provider,
                    attempts: outcome.attempts,
                }
            }
        };

        Ok(ResolvedAnswer {
            resolution_id,
            source: answer.source,
            payload: answer.payload,
            citations: answer.citations,
            provider_used: Some(answer.provider_used),
            cache_key_used: key,
            golden_entry_id: None,
            attempts: answer.attempts,
            latency_ms: elapsed_ms(started),
        })
    }

    /// Cache key for this request, or None when the epoch snapshot is unavailable
    async fn cache_key(&self, query: &ClassifiedQuery) -> Option<CacheKey> {
        let timeout_ms = self.config.epoch_timeout.as_millis() as u64;
        let snapshot = match tokio::time::timeout(self.config.epoch_timeout, self.epochs.current())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::timeout(timeout_ms, "epoch snapshot")),
        };

        match snapshot {
            Ok(epochs) => Some(self.fingerprints.build_key(
                &query.signature,
                &query.attachment_hashes,
                &epochs,
                query.routing_strategy,
            )),
            Err(e) => {
                warn!("Epochs unavailable, bypassing cache: {}", e);
                None
            }
        }
    }

    async fn golden_servable(&self, found: &GoldenMatch) -> bool {
        if !found.is_high_confidence() {
            debug!(
                "Golden entry {} below confidence threshold ({:.4})",
                found.entry.id, found.score
            );
            return false;
        }

        let verdict = self.freshness.check(&found.entry, Utc::now()).await;
        if !verdict.is_safe() {
            debug!("Golden entry {} withheld: {:?}", found.entry.id, verdict);
        }
        verdict.is_safe()
    }

    /// Drop cached answers whose signature digest starts with `signature_prefix`
    ///
    /// Called by the golden publish workflow. Returns the number of entries removed.
    pub async fn invalidate(&self, signature_prefix: &str) -> usize {
        let removed = self
            .cache
            .invalidate(InvalidationPredicate::SignaturePrefix(signature_prefix.to_string()))
            .await;
        info!("Invalidated {} cached answers for prefix '{}'", removed, signature_prefix);
        removed
    }

    /// Drop every cached answer for `signature`, across epochs, attachments and strategies
    pub async fn invalidate_signature(&self, signature: &QuerySignature) -> usize {
        let digest = self.fingerprints.signature_digest(signature);
        self.invalidate(&digest.to_hex()).await
    }

    /// Drop cached answers produced by `provider`
    pub async fn invalidate_provider(&self, provider: &ProviderId) -> usize {
        self.cache
            .invalidate(InvalidationPredicate::Provider(provider.clone()))
            .await
    }

    /// Drop cached answers produced under `strategy`
    pub async fn invalidate_strategy(&self, strategy: StrategyKind) -> usize {
        self.cache
            .invalidate(InvalidationPredicate::Strategy(strategy))
            .await
    }
}

impl Drop for ResolutionOrchestrator {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }
    }
}

/// Everything the leader of a flight needs, owned so the work outlives the requester
struct Flight {
    cache: ResponseCache,
    executor: CallExecutor,
    key: CacheKey,
    domain_tag: String,
    request: Arc<ModelRequest>,
    plan: CallPlan,
    first: RoutingDecision,
}

impl Flight {
    async fn compute(self) -> FlightResult {
        // An earlier flight may have filled the key between our miss and this flight
        if let Some(hit) = self.cache.get(&self.key).await {
            debug!("Cache filled while joining flight {}", self.key);
            return Ok(FlightAnswer::from_cache(hit));
        }

        let outcome = self
            .executor
            .execute(self.request, &self.plan, self.first)
            .await?;

        let provider = outcome.decision.selected_provider;
        let payload = CachePayload::new(
            outcome.response.text.clone(),
            provider.clone(),
            self.plan.strategy,
        )
        .with_citations(outcome.response.citations.clone())
        .with_tag(self.domain_tag);
        self.cache.put(self.key, payload, None).await;

        Ok(FlightAnswer {
            source: AnswerSource::Provider,
            payload: outcome.response.text,
            citations: outcome.response.citations,
            provider_used: provider,
            attempts: outcome.attempts,
        })
    }
}

pub fn domain_tag(signature: &QuerySignature) -> String {
    format!("domain:{}", signature.canonical_domain())
}

/// A flight that never produced a result still surfaces as one upstream failure
fn interrupted_flight(error: FlightError, key: &CacheKey, provider: ProviderId) -> ResolveError {
    warn!("Flight for {} was interrupted: {}", key, error);
    ResolveError::Upstream(UpstreamFailure {
        attempt_count: 0,
        last_provider: provider,
        error_kind: CallErrorKind::Internal,
        cause: FailureCause::Interrupted,
        message: error.to_string(),
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Assembles an orchestrator; collaborators left unset default to in-process stores
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: Option<ResolverConfig>,
    golden_store: Option<Arc<dyn GoldenStore>>,
    scorer: Option<Arc<dyn SimilarityScorer>>,
    knowledge_base: Option<Arc<dyn KnowledgeBase>>,
    cache_backend: Option<Arc<dyn CacheBackend>>,
    epochs: Option<Arc<dyn EpochSource>>,
    model_client: Option<Arc<dyn ModelClient>>,
    router: Option<ProviderRouter>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn golden_store(mut self, store: Arc<dyn GoldenStore>) -> Self {
        self.golden_store = Some(store);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn knowledge_base(mut self, kb: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge_base = Some(kb);
        self
    }

    pub fn cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    pub fn epochs(mut self, epochs: Arc<dyn EpochSource>) -> Self {
        self.epochs = Some(epochs);
        self
    }

    pub fn model_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.model_client = Some(client);
        self
    }

    pub fn router(mut self, router: ProviderRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Validate the configuration and wire the pipeline
    ///
    /// A defaulted in-memory cache gets its cleanup task when auto cleanup is enabled and
    /// a tokio runtime is current.
    pub fn build(self) -> Result<ResolutionOrchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate().map_err(ResolveError::Config)?;

        let client = self
            .model_client
            .ok_or_else(|| ResolveError::Config("a model client is required".to_string()))?;
        let router = self
            .router
            .ok_or_else(|| ResolveError::Config("a provider router is required".to_string()))?;
        if router.providers().is_empty() {
            return Err(ResolveError::Config(
                "the provider router has no providers".to_string(),
            ));
        }
        let router = Arc::new(router);

        let mut golden = GoldenSetMatcher::new(
            self.golden_store
                .unwrap_or_else(|| Arc::new(InMemoryGoldenStore::new())),
        )
        .with_timeout(config.golden_timeout);
        if let Some(scorer) = self.scorer {
            golden = golden.with_scorer(scorer);
        }

        let freshness = FreshnessGate::new(
            self.knowledge_base
                .unwrap_or_else(|| Arc::new(InMemoryKnowledgeBase::new())),
            config.freshness.clone(),
        );

        let mut cleanup = None;
        let backend: Arc<dyn CacheBackend> = match self.cache_backend {
            Some(backend) => backend,
            None => {
                let in_memory = Arc::new(InMemoryCacheBackend::new(config.cache.clone()));
                if config.cache.enable_auto_cleanup {
                    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                        let task = runtime.spawn(start_auto_cleanup(Arc::clone(&in_memory)));
                        cleanup = Some(task.abort_handle());
                    }
                }
                in_memory
            }
        };
        let cache = ResponseCache::new(backend, config.cache.clone());

        let executor = CallExecutor::new(client, Arc::clone(&router), config.retry.clone())
            .with_call_timeout(config.provider_timeout);

        let epochs = self
            .epochs
            .unwrap_or_else(|| Arc::new(StaticEpochs::default()));

        info!(
            "Resolution orchestrator ready: {} providers, environment {}, speculative lookup {}",
            router.providers().len(),
            config.environment,
            config.speculative_cache_lookup
        );

        Ok(ResolutionOrchestrator {
            golden,
            freshness,
            cache,
            router,
            executor,
            epochs,
            flights: RequestCoalescer::new(),
            fingerprints: FingerprintBuilder::new(),
            config,
            cleanup,
        })
    }
}
