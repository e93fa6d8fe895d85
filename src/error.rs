//! Error types for query resolution
//!
//! Failures on the optimization paths (golden lookup, freshness check, response cache,
//! epoch lookup) are expressed as [`BackendError`] and are always degraded gracefully.
//! Failures on the mandatory path surface as exactly one [`ResolveError`].

use crate::routing::ProviderId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error from an advisory backend: cache store, golden store, knowledge base or epoch source
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Backend could not be reached or refused the operation
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl BackendError {
    pub fn timeout(timeout_ms: u64, context: impl Into<String>) -> Self {
        BackendError::Timeout {
            timeout_ms,
            context: context.into(),
        }
    }
}

impl From<String> for BackendError {
    fn from(s: String) -> Self {
        BackendError::Other(s)
    }
}

impl From<&str> for BackendError {
    fn from(s: &str) -> Self {
        BackendError::Other(s.to_string())
    }
}

/// Classification of a single failed model call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallErrorKind {
    /// The call did not complete within the provider timeout
    Timeout,
    /// The provider throttled the request
    RateLimited,
    /// The provider endpoint could not be reached
    Unavailable,
    /// The provider answered with a server-side error
    ServerError,
    /// The provider answered but the payload was unusable
    InvalidResponse,
    /// The provider refused the request
    Rejected,
    /// The call was lost inside this process
    Internal,
}

impl CallErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallErrorKind::Timeout => "timeout",
            CallErrorKind::RateLimited => "rate_limited",
            CallErrorKind::Unavailable => "unavailable",
            CallErrorKind::ServerError => "server_error",
            CallErrorKind::InvalidResponse => "invalid_response",
            CallErrorKind::Rejected => "rejected",
            CallErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed attempt against one provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderCallError {
    pub kind: CallErrorKind,
    pub message: String,
}

impl ProviderCallError {
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            CallErrorKind::Timeout,
            format!("no response within {}ms", timeout_ms),
        )
    }
}

/// Errors raised while choosing a provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    /// Operational providers exist but none fits the cost ceiling
    #[error("Budget exceeded: cheapest estimate {cheapest_estimate:.6} is above ceiling {budget_ceiling:.6}")]
    BudgetExceeded {
        budget_ceiling: f64,
        cheapest_estimate: f64,
    },

    /// Every configured provider is unhealthy
    #[error("No healthy provider: all {candidates} candidates are unavailable")]
    NoHealthyProvider { candidates: usize },
}

/// Why the retry state machine reached `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Production policy: the final allowed attempt failed
    FailFast,
    /// The attempt budget was spent
    Exhausted,
    /// The router had no untried candidate left
    NoFailover,
    /// The shared computation panicked or was aborted; attempts are not known
    Interrupted,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::FailFast => write!(f, "fail_fast"),
            FailureCause::Exhausted => write!(f, "exhausted"),
            FailureCause::NoFailover => write!(f, "no_failover"),
            FailureCause::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Terminal upstream failure, identical in shape for one failed attempt and for many
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Upstream call failed after {attempt_count} attempt(s), last provider {last_provider} ({error_kind}, {cause}): {message}")]
pub struct UpstreamFailure {
    pub attempt_count: u32,
    pub last_provider: ProviderId,
    pub error_kind: CallErrorKind,
    pub cause: FailureCause,
    pub message: String,
}

/// Error while deriving fingerprints from collaborator input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("Invalid attachment digest '{value}': {reason}")]
    InvalidDigest { value: String, reason: String },
}

/// Main error type returned from a resolution
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// No provider could be selected
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// The provider path failed after the retry policy ran its course
    #[error(transparent)]
    Upstream(#[from] UpstreamFailure),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl ResolveError {
    /// Upstream failures map to a 5xx response in the API layer
    pub fn is_upstream(&self) -> bool {
        matches!(self, ResolveError::Upstream(_))
    }
}

/// Result type alias for resolution operations
pub type Result<T> = std::result::Result<T, ResolveError>;

impl From<String> for ResolveError {
    fn from(s: String) -> Self {
        ResolveError::Other(s)
    }
}

impl From<&str> for ResolveError {
    fn from(s: &str) -> Self {
        ResolveError::Other(s.to_string())
    }
}
