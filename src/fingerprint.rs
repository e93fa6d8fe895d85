//! Deterministic fingerprints for classified queries
//!
//! A [`CacheKey`] is derived from the canonical query signature, the sorted set of
//! attachment digests, the freshness epochs and the routing strategy. Bumping any epoch
//! moves the request into a new key space, which is the only invalidation the cache needs
//! for upstream dataset changes.
//!
//! Every field is hashed as `tag, 0x00, u64 big-endian length, bytes` so that no two
//! distinct tuples share an encoding.

use crate::error::FingerprintError;
use crate::routing::StrategyKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Leading segment of every cache key; bump when the encoding changes
pub const KEY_PREFIX: &str = "rk1";

const SIGNATURE_VERSION: &str = "sig/v1";
const KEY_VERSION: &str = "rk/v1";

/// Normalized fact extracted by the classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FactValue {
    Text { value: String },
    /// Monetary amount in minor units (cents) and ISO currency code
    Amount { minor_units: i64, currency: String },
    /// Rate in basis points (4.25% = 425)
    Rate { basis_points: i64 },
    Date { value: NaiveDate },
}

impl FactValue {
    pub fn text(value: impl Into<String>) -> Self {
        FactValue::Text {
            value: value.into(),
        }
    }

    pub fn amount(minor_units: i64, currency: impl Into<String>) -> Self {
        FactValue::Amount {
            minor_units,
            currency: currency.into(),
        }
    }

    pub fn rate(basis_points: i64) -> Self {
        FactValue::Rate { basis_points }
    }

    pub fn date(value: NaiveDate) -> Self {
        FactValue::Date { value }
    }

    /// Canonical textual form used for hashing
    pub fn canonical(&self) -> String {
        match self {
            FactValue::Text { value } => format!("text:{}", collapse_whitespace(value)),
            FactValue::Amount {
                minor_units,
                currency,
            } => format!("amount:{}:{}", currency.trim().to_uppercase(), minor_units),
            FactValue::Rate { basis_points } => format!("rate:bp:{}", basis_points),
            FactValue::Date { value } => format!("date:{}", value.format("%Y-%m-%d")),
        }
    }
}

/// Canonical representation of a classified query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySignature {
    /// Domain label assigned by the classifier (e.g. "vat")
    pub domain: String,

    /// Action label assigned by the classifier (e.g. "filing_deadline")
    pub action: String,

    /// Query text after anonymization
    pub text: String,

    /// Extracted facts keyed by name
    #[serde(default)]
    pub facts: BTreeMap<String, FactValue>,

    /// Optional classifier embedding, used for semantic matching only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl QuerySignature {
    pub fn new(
        domain: impl Into<String>,
        action: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            action: action.into(),
            text: text.into(),
            facts: BTreeMap::new(),
            embedding: None,
        }
    }

    pub fn with_fact(mut self, key: impl Into<String>, value: FactValue) -> Self {
        self.facts.insert(key.into(), value);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn canonical_domain(&self) -> String {
        self.domain.trim().to_lowercase()
    }

    pub fn canonical_action(&self) -> String {
        self.action.trim().to_lowercase()
    }

    /// Lowercased text with runs of whitespace collapsed to one space
    pub fn canonical_text(&self) -> String {
        collapse_whitespace(&self.text).to_lowercase()
    }

    /// Facts with normalized keys, in key order
    pub fn canonical_facts(&self) -> Vec<(String, String)> {
        let normalized: BTreeMap<String, String> = self
            .facts
            .iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v.canonical()))
            .collect();
        normalized.into_iter().collect()
    }
}

/// SHA-256 digest of one uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttachmentFingerprint([u8; 32]);

impl AttachmentFingerprint {
    /// Hash raw file content
    pub fn of_bytes(content: &[u8]) -> Self {
        Self(Sha256::digest(content).into())
    }

    /// Parse a 64-character hex digest as produced by the upload layer
    pub fn from_hex(value: &str) -> Result<Self, FingerprintError> {
        let bytes = hex::decode(value.trim()).map_err(|e| FingerprintError::InvalidDigest {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
        let digest: [u8; 32] =
            bytes
                .try_into()
                .map_err(|b: Vec<u8>| FingerprintError::InvalidDigest {
                    value: value.to_string(),
                    reason: format!("expected 32 bytes, got {}", b.len()),
                })?;
        Ok(Self(digest))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for AttachmentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for AttachmentFingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AttachmentFingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// Version counters of the upstream datasets, snapshotted once per request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EpochStamps {
    pub kb_epoch: u64,
    pub golden_epoch: u64,
    pub domain_dataset_epoch: u64,
    pub parser_version: String,
}

impl EpochStamps {
    pub fn new(
        kb_epoch: u64,
        golden_epoch: u64,
        domain_dataset_epoch: u64,
        parser_version: impl Into<String>,
    ) -> Self {
        Self {
            kb_epoch,
            golden_epoch,
            domain_dataset_epoch,
            parser_version: parser_version.into(),
        }
    }
}

impl fmt::Display for EpochStamps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kb:{} golden:{} dataset:{} parser:{}",
            self.kb_epoch, self.golden_epoch, self.domain_dataset_epoch, self.parser_version
        )
    }
}

/// Signature-only digest, shared by golden lookups and publish invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureDigest([u8; 32]);

impl SignatureDigest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SignatureDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Response cache key: `rk1:<signature digest>:<full digest>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex signature digest embedded in the key
    pub fn signature_hex(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Key-space prefix covering every key whose signature digest starts with `digest_prefix`
    pub fn prefix_for(digest_prefix: &str) -> String {
        format!("{}:{}", KEY_PREFIX, digest_prefix.trim().to_lowercase())
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pure key derivation, no I/O
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintBuilder;

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Digest of the canonical signature alone
    pub fn signature_digest(&self, signature: &QuerySignature) -> SignatureDigest {
        let mut hasher = Sha256::new();
        write_field(&mut hasher, "sig.version", SIGNATURE_VERSION.as_bytes());
        write_field(&mut hasher, "sig.domain", signature.canonical_domain().as_bytes());
        write_field(&mut hasher, "sig.action", signature.canonical_action().as_bytes());
        write_field(&mut hasher, "sig.text", signature.canonical_text().as_bytes());
        for (key, value) in signature.canonical_facts() {
            write_field(&mut hasher, "sig.fact", format!("{}={}", key, value).as_bytes());
        }
        SignatureDigest(hasher.finalize().into())
    }

    /// Full response-cache key
    pub fn build_key(
        &self,
        signature: &QuerySignature,
        attachments: &[AttachmentFingerprint],
        epochs: &EpochStamps,
        strategy: StrategyKind,
    ) -> CacheKey {
        let signature_hex = self.signature_digest(signature).to_hex();

        let mut sorted: Vec<AttachmentFingerprint> = attachments.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut hasher = Sha256::new();
        write_field(&mut hasher, "key.version", KEY_VERSION.as_bytes());
        write_field(&mut hasher, "sig", signature_hex.as_bytes());
        for attachment in &sorted {
            write_field(&mut hasher, "att", attachment.to_hex().as_bytes());
        }
        write_field(&mut hasher, "epoch.kb", epochs.kb_epoch.to_string().as_bytes());
        write_field(&mut hasher, "epoch.golden", epochs.golden_epoch.to_string().as_bytes());
        write_field(
            &mut hasher,
            "epoch.dataset",
            epochs.domain_dataset_epoch.to_string().as_bytes(),
        );
        write_field(&mut hasher, "epoch.parser", epochs.parser_version.as_bytes());
        write_field(&mut hasher, "strategy", strategy.as_str().as_bytes());

        let full_hex = hex::encode(hasher.finalize());
        CacheKey(format!("{}:{}:{}", KEY_PREFIX, signature_hex, full_hex))
    }
}

fn write_field(hasher: &mut Sha256, tag: &str, value: &[u8]) {
    hasher.update(tag.as_bytes());
    hasher.update([0u8]);
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value);
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
