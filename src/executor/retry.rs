//! Retry/failover state machine
//!
//! `RetryState` transitions are pure: they take the state by value and return the next
//! one, so the whole policy is testable without a clock or a network.
//!
//! ```text
//! Idle -> Calling -> Succeeded
//!                 -> Retrying -> Calling ...
//!                 -> Failed(fail_fast | exhausted | no_failover)
//! ```

use crate::error::{FailureCause, ProviderCallError, UpstreamFailure};
use crate::routing::ProviderId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Deployment environment of the resolver, ordered from least to most strict
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// The stricter of two environments
    pub fn strictest(self, other: Environment) -> Environment {
        self.max(other)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" | "development" | "local" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

/// Phase of one request's call sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Calling,
    Retrying,
    Succeeded,
    Failed(FailureCause),
}

/// A failed attempt and the provider it was sent to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptError {
    pub provider: ProviderId,
    pub error: ProviderCallError,
}

impl AttemptError {
    pub fn new(provider: ProviderId, error: ProviderCallError) -> Self {
        Self { provider, error }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts completed so far, successful or not
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_error: Option<AttemptError>,
    pub environment: Environment,
    /// Set when the attempt in flight is the last one the budget allows
    pub is_final_attempt: bool,
    pub phase: CallPhase,
}

impl RetryState {
    pub fn new(max_attempts: u32, environment: Environment) -> Self {
        Self {
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
            environment,
            is_final_attempt: false,
            phase: CallPhase::Idle,
        }
    }

    /// Idle or Retrying -> Calling
    pub fn begin_attempt(mut self) -> Self {
        self.is_final_attempt = self.attempt_count + 1 >= self.max_attempts;
        self.phase = CallPhase::Calling;
        self
    }

    /// Calling -> Succeeded
    pub fn on_success(mut self) -> Self {
        self.attempt_count += 1;
        self.phase = CallPhase::Succeeded;
        self
    }

    /// Calling -> Retrying | Failed
    pub fn on_failure(mut self, error: AttemptError) -> Self {
        self.attempt_count += 1;
        self.last_error = Some(error);

        self.phase = if self.environment.is_production() && self.is_final_attempt {
            CallPhase::Failed(FailureCause::FailFast)
        } else if self.attempt_count < self.max_attempts {
            CallPhase::Retrying
        } else {
            CallPhase::Failed(FailureCause::Exhausted)
        };
        self
    }

    /// Retrying -> Failed when the router has no untried candidate
    pub fn on_no_failover(mut self) -> Self {
        self.phase = CallPhase::Failed(FailureCause::NoFailover);
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, CallPhase::Succeeded | CallPhase::Failed(_))
    }

    /// The structured failure of a `Failed` state
    pub fn failure(&self) -> Option<UpstreamFailure> {
        let CallPhase::Failed(cause) = self.phase else {
            return None;
        };
        let last = self.last_error.as_ref()?;
        Some(UpstreamFailure {
            attempt_count: self.attempt_count,
            last_provider: last.provider.clone(),
            error_kind: last.error.kind,
            cause,
            message: last.error.message.clone(),
        })
    }
}

/// Attempt budget and backoff between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,

    /// Delay before the first retry; zero disables backoff
    pub base_backoff: Duration,

    pub max_backoff: Duration,

    /// Add up to 25% random delay on top of each backoff
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Immediate failover, no sleeping between attempts
    pub fn production() -> Self {
        Self {
            base_backoff: Duration::ZERO,
            jitter: false,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn without_backoff(mut self) -> Self {
        self.base_backoff = Duration::ZERO;
        self.jitter = false;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.base_backoff > self.max_backoff {
            return Err("base_backoff must not exceed max_backoff".to_string());
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if self.base_backoff.is_zero() || retry == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(retry.saturating_sub(1).min(16));
        let delay = self.base_backoff.saturating_mul(factor).min(self.max_backoff);

        if self.jitter {
            let max_jitter = delay.as_millis() as u64 / 4;
            if max_jitter > 0 {
                let extra = rand::thread_rng().gen_range(0..=max_jitter);
                return delay + Duration::from_millis(extra);
            }
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallErrorKind;

    fn failed_on(provider: &str) -> AttemptError {
        AttemptError::new(
            ProviderId::new(provider),
            ProviderCallError::new(CallErrorKind::ServerError, "503"),
        )
    }

    #[test]
    fn test_success_first_attempt() {
        let state = RetryState::new(3, Environment::Development)
            .begin_attempt()
            .on_success();
        assert_eq!(state.phase, CallPhase::Succeeded);
        assert_eq!(state.attempt_count, 1);
        assert!(state.is_terminal());
        assert!(state.failure().is_none());
    }

    #[test]
    fn test_retry_until_exhausted() {
        let state = RetryState::new(3, Environment::Development).begin_attempt();
        assert!(!state.is_final_attempt);

        let state = state.on_failure(failed_on("a"));
        assert_eq!(state.phase, CallPhase::Retrying);

        let state = state.begin_attempt().on_failure(failed_on("b"));
        assert_eq!(state.phase, CallPhase::Retrying);

        let state = state.begin_attempt();
        assert!(state.is_final_attempt);
        let state = state.on_failure(failed_on("c"));
        assert_eq!(state.phase, CallPhase::Failed(FailureCause::Exhausted));

        let failure = state.failure().unwrap();
        assert_eq!(failure.attempt_count, 3);
        assert_eq!(failure.last_provider, ProviderId::new("c"));
        assert_eq!(failure.error_kind, CallErrorKind::ServerError);
    }

    #[test]
    fn test_production_fails_fast_on_final_attempt() {
        let state = RetryState::new(2, Environment::Production)
            .begin_attempt()
            .on_failure(failed_on("a"));
        assert_eq!(state.phase, CallPhase::Retrying);

        let state = state.begin_attempt().on_failure(failed_on("b"));
        assert_eq!(state.phase, CallPhase::Failed(FailureCause::FailFast));
        assert_eq!(state.failure().unwrap().attempt_count, 2);
    }

    #[test]
    fn test_single_attempt_failure_has_same_shape() {
        let state = RetryState::new(1, Environment::Staging)
            .begin_attempt()
            .on_failure(failed_on("a"));
        let failure = state.failure().unwrap();
        assert_eq!(failure.attempt_count, 1);
        assert_eq!(failure.cause, FailureCause::Exhausted);
    }

    #[test]
    fn test_no_failover() {
        let state = RetryState::new(3, Environment::Development)
            .begin_attempt()
            .on_failure(failed_on("a"))
            .on_no_failover();
        let failure = state.failure().unwrap();
        assert_eq!(failure.cause, FailureCause::NoFailover);
        assert_eq!(failure.attempt_count, 1);
    }

    #[test]
    fn test_zero_max_attempts_still_calls_once() {
        let state = RetryState::new(0, Environment::Development).begin_attempt();
        assert_eq!(state.max_attempts, 1);
        assert!(state.is_final_attempt);
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(150),
            jitter: false,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(50));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(150));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(150));

        assert_eq!(RetryPolicy::production().backoff_for(2), Duration::ZERO);
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.backoff_for(1);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(62));
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default().with_max_attempts(0).validate().is_err());
    }

    #[test]
    fn test_strictest_environment() {
        use Environment::*;
        assert_eq!(Development.strictest(Production), Production);
        assert_eq!(Production.strictest(Development), Production);
        assert_eq!(Staging.strictest(Development), Staging);
        assert_eq!(Development.strictest(Development), Development);
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("Production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert!("qa".parse::<Environment>().is_err());
    }
}
