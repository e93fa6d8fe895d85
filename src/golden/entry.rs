//! Curated golden answers

use crate::fingerprint::QuerySignature;
use crate::types::Citation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authoring lifecycle: `proposed -> approved -> published -> superseded`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoldenStatus {
    Proposed,
    Approved,
    Published,
    Superseded,
}

impl GoldenStatus {
    /// Only published entries are ever served
    pub fn is_servable(&self) -> bool {
        matches!(self, GoldenStatus::Published)
    }

    pub fn can_transition_to(&self, next: GoldenStatus) -> bool {
        matches!(
            (self, next),
            (GoldenStatus::Proposed, GoldenStatus::Approved)
                | (GoldenStatus::Approved, GoldenStatus::Published)
                | (GoldenStatus::Published, GoldenStatus::Superseded)
        )
    }
}

impl fmt::Display for GoldenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoldenStatus::Proposed => write!(f, "proposed"),
            GoldenStatus::Approved => write!(f, "approved"),
            GoldenStatus::Published => write!(f, "published"),
            GoldenStatus::Superseded => write!(f, "superseded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenEntry {
    pub id: String,
    pub signature: QuerySignature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub answer_text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Editorial quality in [0,1], used to break similarity ties
    pub quality_score: f64,
    pub version: u32,
    pub published_at: DateTime<Utc>,
    pub status: GoldenStatus,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl GoldenEntry {
    /// New published entry, version 1
    pub fn published(
        id: impl Into<String>,
        signature: QuerySignature,
        answer_text: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            signature,
            embedding: None,
            answer_text: answer_text.into(),
            citations: Vec::new(),
            quality_score: 0.5,
            version: 1,
            published_at,
            status: GoldenStatus::Published,
            tags: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: GoldenStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_quality_score(mut self, quality_score: f64) -> Self {
        self.quality_score = quality_score;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Entry embedding, falling back to the one on its signature
    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding
            .as_deref()
            .or(self.signature.embedding.as_deref())
    }

    pub fn is_servable(&self) -> bool {
        self.status.is_servable()
    }
}

/// How a golden entry matched the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Semantic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoldenMatch {
    pub entry: GoldenEntry,
    /// Similarity in [0,1]; 1.0 for exact matches
    pub score: f64,
    pub kind: MatchKind,
}

impl GoldenMatch {
    pub fn is_high_confidence(&self) -> bool {
        self.score >= super::HIGH_CONFIDENCE_THRESHOLD
    }
}
