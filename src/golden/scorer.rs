//! Similarity scoring for semantic golden matches

use crate::fingerprint::QuerySignature;
use crate::golden::entry::GoldenEntry;
use std::collections::HashMap;

/// Scores how closely a golden entry answers a query, in [0,1]
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, query: &QuerySignature, candidate: &GoldenEntry) -> f64;
}

/// Cosine similarity of two vectors, computed in f64; 0.0 for empty, mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let x = x as f64;
        let y = y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Whether a candidate can answer the query at all: same domain and action, and no
/// fact key on which the two sides carry different canonical values
pub fn comparable(query: &QuerySignature, candidate: &QuerySignature) -> bool {
    if query.canonical_domain() != candidate.canonical_domain()
        || query.canonical_action() != candidate.canonical_action()
    {
        return false;
    }

    let theirs: HashMap<String, String> = candidate.canonical_facts().into_iter().collect();
    query
        .canonical_facts()
        .iter()
        .all(|(key, value)| theirs.get(key).map_or(true, |other| other == value))
}

/// Cosine of term-frequency vectors over normalized text, zero for non-comparable signatures
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOverlapScorer;

impl TokenOverlapScorer {
    fn term_frequencies(text: &str) -> HashMap<String, f64> {
        let mut tf = HashMap::new();
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            *tf.entry(token.to_string()).or_insert(0.0) += 1.0;
        }
        tf
    }
}

impl SimilarityScorer for TokenOverlapScorer {
    fn score(&self, query: &QuerySignature, candidate: &GoldenEntry) -> f64 {
        if !comparable(query, &candidate.signature) {
            return 0.0;
        }

        let a = Self::term_frequencies(&query.canonical_text());
        let b = Self::term_frequencies(&candidate.signature.canonical_text());
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        let dot: f64 = a
            .iter()
            .filter_map(|(term, x)| b.get(term).map(|y| x * y))
            .sum();
        let norm_a = a.values().map(|x| x * x).sum::<f64>().sqrt();
        let norm_b = b.values().map(|y| y * y).sum::<f64>().sqrt();

        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}

/// Cosine over classifier embeddings, falling back to token overlap when either side has none
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineEmbeddingScorer {
    fallback: TokenOverlapScorer,
}

impl SimilarityScorer for CosineEmbeddingScorer {
    fn score(&self, query: &QuerySignature, candidate: &GoldenEntry) -> f64 {
        if !comparable(query, &candidate.signature) {
            return 0.0;
        }

        match (query.embedding.as_deref(), candidate.embedding()) {
            (Some(a), Some(b)) if a.len() == b.len() && !a.is_empty() => {
                cosine_similarity(a, b).clamp(0.0, 1.0)
            }
            _ => self.fallback.score(query, candidate),
        }
    }
}
