//! Reconnect backoff policy and delay calculation.
//!
//! The portable, sync-only building blocks for reconnection. The timer and
//! state machine that use them live in `ggchat-client`.
//!
//! - [`ReconnectPolicy`]: base, cap, and attempt ceiling
//! - [`reconnect_delay`]: `min(base * 2^attempt, cap)`

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay in seconds (`2^attempt` seconds).
pub const DEFAULT_BASE_DELAY_SECS: u64 = 1;
/// Default maximum delay in seconds.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 60;
/// Default number of attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Reconnection parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// Multiplier applied to `2^attempt`, in seconds.
    pub base_delay_secs: u64,
    /// Delay cap in seconds.
    pub max_delay_secs: u64,
    /// Attempts allowed before the terminal disconnected state.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: DEFAULT_BASE_DELAY_SECS,
            max_delay_secs: DEFAULT_MAX_DELAY_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        reconnect_delay(attempt, self.base_delay_secs, self.max_delay_secs)
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delay calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential reconnect delay.
///
/// Formula: `min(base * 2^attempt, max)` seconds. The shift is clamped so
/// very high attempt numbers saturate instead of overflowing.
pub fn reconnect_delay(attempt: u32, base_delay_secs: u64, max_delay_secs: u64) -> Duration {
    let exponential = base_delay_secs.saturating_mul(1u64 << attempt.min(31));
    Duration::from_secs(exponential.min(max_delay_secs))
}
