//! End-to-end tests for the resolution pipeline
//!
//! Every collaborator is an in-memory fake:
//! - golden store, knowledge base and epochs from the crate
//! - a counting model client with a configurable delay

use answer_resolver::epochs::StaticEpochs;
use answer_resolver::error::ProviderCallError;
use answer_resolver::executor::{ModelClient, ModelRequest, ModelResponse};
use answer_resolver::freshness::{InMemoryKnowledgeBase, KbEntry};
use answer_resolver::golden::{GoldenEntry, InMemoryGoldenStore, SimilarityScorer};
use answer_resolver::routing::{ProviderProfile, ProviderRouter, QualityTier};
use answer_resolver::{
    AnswerSource, AttachmentFingerprint, Citation, ClassifiedQuery, EpochStamps, FactValue,
    FingerprintBuilder, QuerySignature, ResolutionOrchestrator, ResolverConfig, StrategyKind,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

struct CountingClient {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingClient {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for CountingClient {
    async fn complete(
        &self,
        provider: &ProviderProfile,
        request: &ModelRequest,
    ) -> Result<ModelResponse, ProviderCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(
            ModelResponse::new(format!("[{}] {}", provider.id, request.prompt))
                .with_citations(vec![Citation::new("ustg-18", "UStG §18")]),
        )
    }
}

struct ConstantScorer(f64);

impl SimilarityScorer for ConstantScorer {
    fn score(&self, _query: &QuerySignature, _candidate: &GoldenEntry) -> f64 {
        self.0
    }
}

struct Fixture {
    golden: InMemoryGoldenStore,
    kb: InMemoryKnowledgeBase,
    epochs: StaticEpochs,
    client: Arc<CountingClient>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_client(CountingClient::new())
    }

    fn with_client(client: Arc<CountingClient>) -> Self {
        Self {
            golden: InMemoryGoldenStore::new(),
            kb: InMemoryKnowledgeBase::new(),
            epochs: StaticEpochs::new(EpochStamps::new(5, 3, 1, "2")),
            client,
        }
    }

    fn orchestrator(&self) -> ResolutionOrchestrator {
        self.orchestrator_with(None, ResolverConfig::default())
    }

    fn orchestrator_with(
        &self,
        scorer: Option<Arc<dyn SimilarityScorer>>,
        config: ResolverConfig,
    ) -> ResolutionOrchestrator {
        let router = ProviderRouter::new(vec![
            ProviderProfile::new("haiku", "claude-haiku", 0.000_001, QualityTier::Economy),
            ProviderProfile::new("opus", "claude-opus", 0.000_075, QualityTier::Frontier),
        ]);

        let mut builder = ResolutionOrchestrator::builder()
            .config(config)
            .golden_store(Arc::new(self.golden.clone()))
            .knowledge_base(Arc::new(self.kb.clone()))
            .epochs(Arc::new(self.epochs.clone()))
            .model_client(self.client.clone())
            .router(router);
        if let Some(scorer) = scorer {
            builder = builder.scorer(scorer);
        }
        builder.build().unwrap()
    }
}

fn deadline_signature() -> QuerySignature {
    QuerySignature::new("vat", "filing_deadline", "When is the Q1 VAT return due?")
}

fn deadline_query() -> ClassifiedQuery {
    ClassifiedQuery::new(deadline_signature(), 0.5)
}

/// Published a month ago, tagged for the Q1 deadline
fn deadline_golden(signature: QuerySignature) -> GoldenEntry {
    GoldenEntry::published(
        "g-vat-q1",
        signature,
        "The Q1 return is due on April 10.",
        Utc::now() - ChronoDuration::days(30),
    )
    .with_tags(["vat-deadline"])
    .with_citations(vec![Citation::new("ustg-18", "UStG §18")])
}

fn paraphrased_golden() -> GoldenEntry {
    deadline_golden(QuerySignature::new(
        "vat",
        "filing_deadline",
        "Due date of the first-quarter VAT return",
    ))
}

#[tokio::test]
async fn test_exact_golden_match_is_served_without_provider_calls() {
    let fixture = Fixture::new();
    fixture.golden.insert(deadline_golden(deadline_signature())).await;
    let resolver = fixture.orchestrator();

    let answer = assert_ok!(resolver.resolve(&deadline_query()).await);

    assert_eq!(answer.source, AnswerSource::Golden);
    assert_eq!(answer.golden_entry_id.as_deref(), Some("g-vat-q1"));
    assert_eq!(answer.payload, "The Q1 return is due on April 10.");
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.provider_used, None);
    assert_eq!(answer.attempts, 0);
    assert_eq!(fixture.client.calls(), 0);
}

#[tokio::test]
async fn test_semantic_match_at_095_serves_golden() {
    let fixture = Fixture::new();
    fixture.golden.insert(paraphrased_golden()).await;
    let resolver =
        fixture.orchestrator_with(Some(Arc::new(ConstantScorer(0.95))), ResolverConfig::default());

    let answer = assert_ok!(resolver.resolve(&deadline_query()).await);

    assert_eq!(answer.source, AnswerSource::Golden);
    assert_eq!(fixture.client.calls(), 0);
}

#[tokio::test]
async fn test_confidence_threshold_is_inclusive_at_090() {
    let fixture = Fixture::new();
    fixture.golden.insert(paraphrased_golden()).await;

    let below = fixture.orchestrator_with(
        Some(Arc::new(ConstantScorer(0.8999))),
        ResolverConfig::default(),
    );
    let answer = assert_ok!(below.resolve(&deadline_query()).await);
    assert_eq!(answer.source, AnswerSource::Provider);
    assert_eq!(fixture.client.calls(), 1);

    let at =
        fixture.orchestrator_with(Some(Arc::new(ConstantScorer(0.90))), ResolverConfig::default());
    let answer = assert_ok!(at.resolve(&deadline_query()).await);
    assert_eq!(answer.source, AnswerSource::Golden);
    assert_eq!(fixture.client.calls(), 1);
}

fn period(year: i32) -> FactValue {
    FactValue::date(NaiveDate::from_ymd_opt(year, 3, 31).unwrap())
}

#[tokio::test]
async fn test_same_text_with_different_date_fact_goes_to_provider() {
    let fixture = Fixture::new();
    fixture
        .golden
        .insert(deadline_golden(deadline_signature().with_fact("period", period(2024))))
        .await;
    let resolver = fixture.orchestrator();

    let next_year =
        ClassifiedQuery::new(deadline_signature().with_fact("period", period(2025)), 0.5);
    let answer = assert_ok!(resolver.resolve(&next_year).await);
    assert_eq!(answer.source, AnswerSource::Provider);
    assert_eq!(answer.golden_entry_id, None);
    assert_eq!(fixture.client.calls(), 1);

    let same_year =
        ClassifiedQuery::new(deadline_signature().with_fact("period", period(2024)), 0.5);
    let answer = assert_ok!(resolver.resolve(&same_year).await);
    assert_eq!(answer.source, AnswerSource::Golden);
}

#[tokio::test]
async fn test_same_text_with_different_action_goes_to_provider() {
    let fixture = Fixture::new();
    fixture.golden.insert(deadline_golden(deadline_signature())).await;
    let resolver = fixture.orchestrator();

    let penalty = ClassifiedQuery::new(
        QuerySignature::new("vat", "penalty_amount", "When is the Q1 VAT return due?"),
        0.5,
    );
    let answer = assert_ok!(resolver.resolve(&penalty).await);

    assert_eq!(answer.source, AnswerSource::Provider);
    assert_eq!(fixture.client.calls(), 1);
}

#[tokio::test]
async fn test_newer_kb_entry_overrides_golden() {
    let fixture = Fixture::new();
    fixture.golden.insert(deadline_golden(deadline_signature())).await;
    fixture
        .kb
        .insert(
            KbEntry::new(
                "kb-bmf-2024-07",
                "Deadline extension for Q1 returns",
                Utc::now() - ChronoDuration::days(2),
            )
            .with_tags(["VAT-Deadline"]),
        )
        .await;
    let resolver = fixture.orchestrator();

    let answer = assert_ok!(resolver.resolve(&deadline_query()).await);

    assert_eq!(answer.source, AnswerSource::Provider);
    assert_eq!(answer.golden_entry_id, None);
    assert_eq!(fixture.client.calls(), 1);
}

#[tokio::test]
async fn test_unrelated_or_old_kb_entries_keep_golden_safe() {
    let fixture = Fixture::new();
    fixture.golden.insert(deadline_golden(deadline_signature())).await;
    fixture
        .kb
        .insert(
            KbEntry::new("kb-rates", "Reduced rate list", Utc::now() - ChronoDuration::days(1))
                .with_tags(["vat-rates"]),
        )
        .await;
    fixture
        .kb
        .insert(
            KbEntry::new("kb-old", "Old deadline note", Utc::now() - ChronoDuration::days(40))
                .with_tags(["vat-deadline"]),
        )
        .await;
    let resolver = fixture.orchestrator();

    let answer = assert_ok!(resolver.resolve(&deadline_query()).await);
    assert_eq!(answer.source, AnswerSource::Golden);
}

#[tokio::test]
async fn test_newer_kb_entry_outside_window_keeps_golden_safe() {
    let fixture = Fixture::new();
    // Golden published 30 days ago; the tagged note is newer but 20 days old
    fixture.golden.insert(deadline_golden(deadline_signature())).await;
    fixture
        .kb
        .insert(
            KbEntry::new("kb-20d", "Deadline note", Utc::now() - ChronoDuration::days(20))
                .with_tags(["vat-deadline"]),
        )
        .await;
    let resolver = fixture.orchestrator();

    let answer = assert_ok!(resolver.resolve(&deadline_query()).await);
    assert_eq!(answer.source, AnswerSource::Golden);
    assert_eq!(fixture.client.calls(), 0);
}

#[tokio::test]
async fn test_newer_kb_entry_just_inside_window_overrides_golden() {
    let fixture = Fixture::new();
    fixture.golden.insert(deadline_golden(deadline_signature())).await;
    fixture
        .kb
        .insert(
            KbEntry::new(
                "kb-13d",
                "Deadline note",
                Utc::now() - ChronoDuration::days(14) + ChronoDuration::hours(1),
            )
            .with_tags(["vat-deadline"]),
        )
        .await;
    let resolver = fixture.orchestrator();

    let answer = assert_ok!(resolver.resolve(&deadline_query()).await);
    assert_eq!(answer.source, AnswerSource::Provider);
}

#[tokio::test]
async fn test_explicit_kb_conflict_overrides_golden() {
    let fixture = Fixture::new();
    fixture.golden.insert(deadline_golden(deadline_signature())).await;
    fixture
        .kb
        .insert(
            KbEntry::new("kb-ruling", "Court ruling", Utc::now() - ChronoDuration::days(3))
                .conflicting_with("g-vat-q1"),
        )
        .await;
    let resolver = fixture.orchestrator();

    let answer = assert_ok!(resolver.resolve(&deadline_query()).await);
    assert_eq!(answer.source, AnswerSource::Provider);
}

#[tokio::test]
async fn test_unverifiable_freshness_falls_through() {
    let fixture = Fixture::new();
    fixture.golden.insert(deadline_golden(deadline_signature())).await;
    fixture.kb.set_available(false);
    let resolver = fixture.orchestrator();

    let answer = assert_ok!(resolver.resolve(&deadline_query()).await);
    assert_eq!(answer.source, AnswerSource::Provider);
}

#[tokio::test]
async fn test_golden_store_outage_degrades_to_provider() {
    let fixture = Fixture::new();
    fixture.golden.insert(deadline_golden(deadline_signature())).await;
    fixture.golden.set_available(false);
    let resolver = fixture.orchestrator();

    let answer = assert_ok!(resolver.resolve(&deadline_query()).await);
    assert_eq!(answer.source, AnswerSource::Provider);
    assert_eq!(fixture.client.calls(), 1);
}

#[tokio::test]
async fn test_second_identical_request_is_a_cache_hit() {
    let fixture = Fixture::new();
    let resolver = fixture.orchestrator();

    let first = assert_ok!(resolver.resolve(&deadline_query()).await);
    let second = assert_ok!(resolver.resolve(&deadline_query()).await);

    assert_eq!(first.source, AnswerSource::Provider);
    assert_eq!(first.attempts, 1);
    assert_eq!(second.source, AnswerSource::Cache);
    assert_eq!(second.attempts, 0);
    assert_eq!(second.payload, first.payload);
    assert_eq!(second.citations, first.citations);
    assert_eq!(second.provider_used, first.provider_used);
    assert_eq!(fixture.client.calls(), 1);
}

#[tokio::test]
async fn test_sequential_lookup_mode_still_hits_cache() {
    let fixture = Fixture::new();
    let config = ResolverConfig::builder()
        .speculative_cache_lookup(false)
        .build();
    let resolver = fixture.orchestrator_with(None, config);

    assert_ok!(resolver.resolve(&deadline_query()).await);
    let second = assert_ok!(resolver.resolve(&deadline_query()).await);

    assert_eq!(second.source, AnswerSource::Cache);
    assert_eq!(fixture.client.calls(), 1);
}

#[tokio::test]
async fn test_cache_key_matches_independent_builder() {
    let fixture = Fixture::new();
    let resolver = fixture.orchestrator();

    let answer = assert_ok!(resolver.resolve(&deadline_query()).await);
    let expected = FingerprintBuilder::new().build_key(
        &deadline_signature(),
        &[],
        &EpochStamps::new(5, 3, 1, "2"),
        StrategyKind::CostOptimized,
    );
    assert_eq!(answer.cache_key_used, Some(expected));
}

#[tokio::test]
async fn test_epoch_bump_forces_a_miss() {
    let fixture = Fixture::new();
    let resolver = fixture.orchestrator();

    let before = assert_ok!(resolver.resolve(&deadline_query()).await);
    fixture.epochs.bump_kb().await;
    let after = assert_ok!(resolver.resolve(&deadline_query()).await);

    assert_eq!(after.source, AnswerSource::Provider);
    assert_ne!(before.cache_key_used, after.cache_key_used);
    assert_eq!(fixture.client.calls(), 2);
}

#[tokio::test]
async fn test_epoch_source_outage_bypasses_cache() {
    let fixture = Fixture::new();
    fixture.epochs.set_available(false);
    let resolver = fixture.orchestrator();

    let first = assert_ok!(resolver.resolve(&deadline_query()).await);
    let second = assert_ok!(resolver.resolve(&deadline_query()).await);

    assert_eq!(first.source, AnswerSource::Provider);
    assert_eq!(first.cache_key_used, None);
    assert_eq!(second.source, AnswerSource::Provider);
    assert_eq!(fixture.client.calls(), 2);

    // Nothing was written while bypassed
    fixture.epochs.set_available(true);
    let third = assert_ok!(resolver.resolve(&deadline_query()).await);
    assert_eq!(third.source, AnswerSource::Provider);
    assert_eq!(fixture.client.calls(), 3);
}

#[tokio::test]
async fn test_attachments_partition_the_cache() {
    let fixture = Fixture::new();
    let resolver = fixture.orchestrator();

    let plain = deadline_query();
    let with_invoice =
        deadline_query().with_attachment(AttachmentFingerprint::of_bytes(b"%PDF-1.7 invoice"));

    let a = assert_ok!(resolver.resolve(&plain).await);
    let b = assert_ok!(resolver.resolve(&with_invoice).await);

    assert_eq!(b.source, AnswerSource::Provider);
    assert_ne!(a.cache_key_used, b.cache_key_used);
    assert_eq!(fixture.client.calls(), 2);
}

#[tokio::test]
async fn test_invalidate_prefix_from_publish_workflow() {
    let fixture = Fixture::new();
    let resolver = fixture.orchestrator();

    let first = assert_ok!(resolver.resolve(&deadline_query()).await);
    let key = first.cache_key_used.unwrap();

    assert_eq!(resolver.invalidate(&key.signature_hex()[..16]).await, 1);
    assert_eq!(resolver.invalidate("").await, 0);

    let again = assert_ok!(resolver.resolve(&deadline_query()).await);
    assert_eq!(again.source, AnswerSource::Provider);
    assert_eq!(fixture.client.calls(), 2);
}

#[tokio::test]
async fn test_concurrent_identical_requests_share_one_provider_call() {
    let fixture = Fixture::with_client(CountingClient::with_delay(Duration::from_millis(100)));
    let resolver = Arc::new(fixture.orchestrator());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve(&deadline_query()).await })
        })
        .collect();

    let mut payloads = Vec::new();
    for handle in handles {
        let answer = handle.await.unwrap().unwrap();
        assert_eq!(answer.source, AnswerSource::Provider);
        payloads.push(answer.payload);
    }

    assert_eq!(fixture.client.calls(), 1);
    assert!(payloads.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(resolver.in_flight(), 0);
}

#[tokio::test]
async fn test_cancelling_first_requester_does_not_fail_the_others() {
    let fixture = Fixture::with_client(CountingClient::with_delay(Duration::from_millis(100)));
    let resolver = Arc::new(fixture.orchestrator());

    let first = {
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move { resolver.resolve(&deadline_query()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let others: Vec<_> = (0..3)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve(&deadline_query()).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    for handle in others {
        let answer = handle.await.unwrap().unwrap();
        assert_eq!(answer.source, AnswerSource::Provider);
    }
    assert_eq!(fixture.client.calls(), 1);

    // The shared flight populated the cache
    let later = assert_ok!(resolver.resolve(&deadline_query()).await);
    assert_eq!(later.source, AnswerSource::Cache);
}
