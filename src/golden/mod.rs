//! Curated golden answer set: entries, store access, similarity scoring and matching

pub mod entry;
pub mod matcher;
pub mod scorer;
pub mod store;

pub use entry::{GoldenEntry, GoldenMatch, GoldenStatus, MatchKind};
pub use matcher::GoldenSetMatcher;
pub use scorer::{cosine_similarity, CosineEmbeddingScorer, SimilarityScorer, TokenOverlapScorer};
pub use store::{GoldenStore, InMemoryGoldenStore};

/// Minimum similarity at which a golden answer may be served; policy, not configuration
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.90;
