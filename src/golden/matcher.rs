//! Exact-then-semantic golden lookup

use crate::error::BackendError;
use crate::fingerprint::{FingerprintBuilder, QuerySignature};
use crate::golden::entry::{GoldenEntry, GoldenMatch, MatchKind};
use crate::golden::scorer::{CosineEmbeddingScorer, SimilarityScorer};
use crate::golden::store::GoldenStore;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct GoldenSetMatcher {
    store: Arc<dyn GoldenStore>,
    scorer: Arc<dyn SimilarityScorer>,
    fingerprints: FingerprintBuilder,
    lookup_timeout: Duration,
}

impl GoldenSetMatcher {
    pub fn new(store: Arc<dyn GoldenStore>) -> Self {
        Self {
            store,
            scorer: Arc::new(CosineEmbeddingScorer::default()),
            fingerprints: FingerprintBuilder::new(),
            lookup_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    /// Best published match for `signature`; backend failures read as no match
    pub async fn match_signature(&self, signature: &QuerySignature) -> Option<GoldenMatch> {
        let timeout_ms = self.lookup_timeout.as_millis() as u64;
        let result = match timeout(self.lookup_timeout, self.lookup(signature)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::timeout(timeout_ms, "golden lookup")),
        };

        match result {
            Ok(found) => found,
            Err(e) => {
                warn!("Golden lookup degraded to no match: {}", e);
                None
            }
        }
    }

    async fn lookup(
        &self,
        signature: &QuerySignature,
    ) -> Result<Option<GoldenMatch>, BackendError> {
        let digest = self.fingerprints.signature_digest(signature);

        if let Some(entry) = self.store.get_by_digest(&digest).await? {
            if entry.is_servable() {
                debug!("Golden exact match {} for digest {}", entry.id, digest);
                return Ok(Some(GoldenMatch {
                    entry,
                    score: 1.0,
                    kind: MatchKind::Exact,
                }));
            }
        }

        let candidates = self.store.published_entries(signature).await?;
        let best = candidates
            .into_iter()
            .filter(GoldenEntry::is_servable)
            .filter_map(|entry| {
                let score = self.scorer.score(signature, &entry);
                (score.is_finite() && score > 0.0).then(|| (entry, score.clamp(0.0, 1.0)))
            })
            .max_by(|(a, sa), (b, sb)| rank(a, *sa, b, *sb));

        Ok(best.map(|(entry, score)| {
            debug!("Golden semantic match {} score {:.4}", entry.id, score);
            GoldenMatch {
                entry,
                score,
                kind: MatchKind::Semantic,
            }
        }))
    }
}

/// Higher score, then higher quality, then smaller id ranks greater
fn rank(a: &GoldenEntry, score_a: f64, b: &GoldenEntry, score_b: f64) -> Ordering {
    score_a
        .partial_cmp(&score_b)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.quality_score
                .partial_cmp(&b.quality_score)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.id.cmp(&a.id))
}
