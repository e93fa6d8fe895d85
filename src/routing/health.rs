//! Provider availability tracking (circuit breaker style)
//!
//! Health is a soft signal: writers race freely and the last observation wins. Each
//! observation moves the state in one direction only: a failure never improves it and a
//! success never worsens it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use tracing::{info, warn};

/// Availability of a provider as seen by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityState {
    /// Recent calls succeed
    Healthy,
    /// Recent calls failed, still routable
    Degraded,
    /// Circuit open: not routable until the cooldown passes
    Unhealthy,
}

impl AvailabilityState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AvailabilityState::Healthy,
            1 => AvailabilityState::Degraded,
            _ => AvailabilityState::Unhealthy,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            AvailabilityState::Healthy => 0,
            AvailabilityState::Degraded => 1,
            AvailabilityState::Unhealthy => 2,
        }
    }

    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, AvailabilityState::Healthy | AvailabilityState::Degraded)
    }
}

/// Thresholds for opening and probing the circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Consecutive failures that open the circuit
    pub open_after: u32,

    /// Time an open circuit waits before admitting a probe call
    pub cooldown_ms: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            open_after: 3,
            cooldown_ms: 30_000,
        }
    }
}

/// Shared, lock-free health record of one provider
#[derive(Debug)]
pub struct ProviderHealth {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at_ms: AtomicU64,
    policy: HealthPolicy,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self::new(HealthPolicy::default())
    }
}

impl ProviderHealth {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            state: AtomicU8::new(AvailabilityState::Healthy.as_u8()),
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            policy,
        }
    }

    pub fn state(&self) -> AvailabilityState {
        AvailabilityState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Whether the router may send traffic; an open circuit admits probes after its cooldown
    pub fn is_routable(&self) -> bool {
        match self.state() {
            AvailabilityState::Healthy | AvailabilityState::Degraded => true,
            AvailabilityState::Unhealthy => {
                let opened_at = self.opened_at_ms.load(Ordering::Acquire);
                let elapsed = now_ms().saturating_sub(opened_at);
                elapsed >= self.policy.cooldown_ms
            }
        }
    }

    pub fn record_success(&self) {
        let previous = self.state();
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_ms.store(0, Ordering::Release);
        self.state
            .store(AvailabilityState::Healthy.as_u8(), Ordering::Release);

        if previous != AvailabilityState::Healthy {
            info!("Provider recovered ({:?} -> Healthy)", previous);
        }
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        if failures >= self.policy.open_after {
            // A failed half-open probe restarts the cooldown
            self.opened_at_ms.store(now_ms(), Ordering::Release);
            let previous = self
                .state
                .swap(AvailabilityState::Unhealthy.as_u8(), Ordering::AcqRel);
            if previous != AvailabilityState::Unhealthy.as_u8() {
                warn!("Provider circuit opened after {} consecutive failures", failures);
            }
        } else {
            // Never downgrade an open circuit back to degraded
            let _ = self.state.compare_exchange(
                AvailabilityState::Healthy.as_u8(),
                AvailabilityState::Degraded.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Operator override, e.g. draining a provider
    pub fn force_state(&self, state: AvailabilityState) {
        if state == AvailabilityState::Unhealthy {
            self.opened_at_ms.store(now_ms(), Ordering::Release);
        }
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_failure_degrades_then_opens() {
        let health = ProviderHealth::new(HealthPolicy {
            open_after: 3,
            cooldown_ms: 60_000,
        });
        assert_eq!(health.state(), AvailabilityState::Healthy);

        health.record_failure();
        assert_eq!(health.state(), AvailabilityState::Degraded);
        assert!(health.is_routable());

        health.record_failure();
        health.record_failure();
        assert_eq!(health.state(), AvailabilityState::Unhealthy);
        assert!(!health.is_routable());
    }

    #[test]
    fn test_success_closes_circuit() {
        let health = ProviderHealth::new(HealthPolicy {
            open_after: 1,
            cooldown_ms: 60_000,
        });
        health.record_failure();
        assert_eq!(health.state(), AvailabilityState::Unhealthy);

        health.record_success();
        assert_eq!(health.state(), AvailabilityState::Healthy);
        assert_eq!(health.consecutive_failures(), 0);
        assert!(health.is_routable());
    }

    #[test]
    fn test_cooldown_admits_probe() {
        let health = ProviderHealth::new(HealthPolicy {
            open_after: 1,
            cooldown_ms: 20,
        });
        health.record_failure();
        assert!(!health.is_routable());

        std::thread::sleep(Duration::from_millis(40));
        assert!(health.is_routable());
        assert_eq!(health.state(), AvailabilityState::Unhealthy);
    }

    #[test]
    fn test_concurrent_failures_open_circuit() {
        let health = Arc::new(ProviderHealth::new(HealthPolicy {
            open_after: 8,
            cooldown_ms: 60_000,
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let health = Arc::clone(&health);
                std::thread::spawn(move || health.record_failure())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(health.consecutive_failures(), 8);
        assert_eq!(health.state(), AvailabilityState::Unhealthy);
    }

    #[test]
    fn test_force_state() {
        let health = ProviderHealth::default();
        health.force_state(AvailabilityState::Unhealthy);
        assert!(!health.is_routable());
        health.force_state(AvailabilityState::Healthy);
        assert!(health.is_routable());
    }
}
