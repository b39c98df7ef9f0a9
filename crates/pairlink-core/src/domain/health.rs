//! Per-endpoint webhook health: a consecutive-failure circuit breaker.
//!
//! An endpoint that fails `failure_threshold` deliveries in a row is locked
//! out for a flat `cooldown`.  While locked out no request is sent at all.
//! When the cooldown expires the endpoint is tried again with a clean slate.
//!
//! ```text
//! healthy ──fail×threshold──► cooling down ──cooldown elapsed──► healthy
//!    ▲                                                              │
//!    └───────────────────────────── 2xx ◄───────────────────────────┘
//! ```
//!
//! Failure log lines are throttled to one per `log_throttle` window so a dead
//! endpoint cannot flood the logs.
//!
//! All methods take `now` explicitly; the type never reads a clock.

use std::time::Duration;

use tokio::time::Instant;

/// Longest lockout ever applied.  Larger cooldowns are clamped to it.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Breaker tunables shared by every endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub log_throttle: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_millis(300_000),
            log_throttle: Duration::from_millis(60_000),
        }
    }
}

/// What a recorded failure did to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still below the threshold; `consecutive` failures so far.
    Counted { consecutive: u32 },
    /// Threshold reached; endpoint skipped until `until`.
    Tripped { until: Instant },
}

/// Health record for one webhook endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointHealth {
    consecutive_failures: u32,
    disabled_until: Option<Instant>,
    last_logged_at: Option<Instant>,
}

impl EndpointHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a delivery may be attempted at `now`.
    pub fn admits(&self, now: Instant) -> bool {
        match self.disabled_until {
            Some(until) => now >= until,
            None => true,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn disabled_until(&self) -> Option<Instant> {
        self.disabled_until
    }

    /// A 2xx response: forget past failures.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.disabled_until = None;
    }

    /// A non-2xx response or transport error.
    pub fn record_failure(&mut self, now: Instant, policy: &BreakerPolicy) -> FailureOutcome {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures >= policy.failure_threshold.max(1) {
            let until = now
                .checked_add(policy.cooldown.min(MAX_COOLDOWN))
                .unwrap_or(now);
            self.disabled_until = Some(until);
            self.consecutive_failures = 0;
            return FailureOutcome::Tripped { until };
        }

        FailureOutcome::Counted {
            consecutive: self.consecutive_failures,
        }
    }

    /// Returns `true` (and starts a new window) if a failure line may be
    /// logged at `now`.
    pub fn should_log(&mut self, now: Instant, policy: &BreakerPolicy) -> bool {
        let due = match self.last_logged_at {
            Some(last) => now.saturating_duration_since(last) >= policy.log_throttle,
            None => true,
        };
        if due {
            self.last_logged_at = Some(now);
        }
        due
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BreakerPolicy {
        BreakerPolicy::default()
    }

    #[test]
    fn test_new_endpoint_admits_delivery() {
        let health = EndpointHealth::new();
        assert!(health.admits(Instant::now()));
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[test]
    fn test_failures_below_threshold_are_counted() {
        let mut health = EndpointHealth::new();
        let now = Instant::now();
        assert_eq!(
            health.record_failure(now, &policy()),
            FailureOutcome::Counted { consecutive: 1 }
        );
        assert_eq!(
            health.record_failure(now, &policy()),
            FailureOutcome::Counted { consecutive: 2 }
        );
        assert!(health.admits(now));
    }

    #[test]
    fn test_threshold_trips_breaker_and_resets_counter() {
        // Arrange
        let mut health = EndpointHealth::new();
        let now = Instant::now();
        health.record_failure(now, &policy());
        health.record_failure(now, &policy());

        // Act
        let outcome = health.record_failure(now, &policy());

        // Assert
        let until = now + Duration::from_millis(300_000);
        assert_eq!(outcome, FailureOutcome::Tripped { until });
        assert_eq!(health.consecutive_failures(), 0);
        assert!(!health.admits(now));
        assert!(!health.admits(now + Duration::from_millis(299_999)));
        assert!(health.admits(until));
    }

    #[test]
    fn test_cooldown_is_flat_not_cumulative() {
        let mut health = EndpointHealth::new();
        let t0 = Instant::now();
        for _ in 0..3 {
            health.record_failure(t0, &policy());
        }
        let t1 = t0 + Duration::from_millis(300_000);
        let outcome = (0..3)
            .map(|_| health.record_failure(t1, &policy()))
            .last()
            .unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Tripped {
                until: t1 + Duration::from_millis(300_000)
            }
        );
    }

    #[test]
    fn test_success_clears_failures_and_cooldown() {
        let mut health = EndpointHealth::new();
        let now = Instant::now();
        health.record_failure(now, &policy());
        health.record_failure(now, &policy());
        health.record_success();
        assert_eq!(health.consecutive_failures(), 0);
        assert!(health.disabled_until().is_none());
        // The next failure starts counting from one again.
        assert_eq!(
            health.record_failure(now, &policy()),
            FailureOutcome::Counted { consecutive: 1 }
        );
    }

    #[test]
    fn test_log_throttle_allows_one_line_per_window() {
        let mut health = EndpointHealth::new();
        let t0 = Instant::now();
        assert!(health.should_log(t0, &policy()));
        assert!(!health.should_log(t0 + Duration::from_secs(30), &policy()));
        assert!(health.should_log(t0 + Duration::from_secs(60), &policy()));
        assert!(!health.should_log(t0 + Duration::from_secs(61), &policy()));
    }

    #[test]
    fn test_huge_cooldown_is_clamped() {
        // Arrange
        let policy = BreakerPolicy {
            failure_threshold: 1,
            cooldown: Duration::MAX,
            ..policy()
        };
        let mut health = EndpointHealth::new();
        let now = Instant::now();

        // Act
        let outcome = health.record_failure(now, &policy);

        // Assert
        assert_eq!(outcome, FailureOutcome::Tripped { until: now + MAX_COOLDOWN });
        assert!(!health.admits(now + Duration::from_secs(30 * 24 * 60 * 60)));
    }

    #[test]
    fn test_zero_threshold_behaves_like_one() {
        let policy = BreakerPolicy {
            failure_threshold: 0,
            ..BreakerPolicy::default()
        };
        let mut health = EndpointHealth::new();
        let outcome = health.record_failure(Instant::now(), &policy);
        assert!(matches!(outcome, FailureOutcome::Tripped { .. }));
    }
}
