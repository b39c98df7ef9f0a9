//! Reconnect scheduling policy.
//!
//! Three delays apply after a connection closes (logged-out closes never
//! reconnect):
//!
//! | Situation                         | Delay                                   |
//! |-----------------------------------|-----------------------------------------|
//! | network asked for a restart       | `restart_required_delay` (500 ms)       |
//! | session has never connected       | `first_pairing_delay` (1500 ms)         |
//! | ordinary drop after a connection  | `min(base * 2^attempts, cap)` (1 s, 60 s) |
//!
//! The constants are tunables, not protocol requirements.

use std::time::Duration;

/// Delay constants for reconnect scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub restart_required_delay: Duration,
    pub first_pairing_delay: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            restart_required_delay: Duration::from_millis(500),
            first_pairing_delay: Duration::from_millis(1500),
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(60_000),
        }
    }
}

impl ReconnectPolicy {
    /// Exponential backoff for the given attempt count, capped at
    /// `backoff_cap`.  Overflow saturates to the cap.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_cap, |d| d.min(self.backoff_cap))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
