//! # Retry Policy
//!
//! Exponential backoff with jitter for the submission queue:
//! `delay = min(base * 2^attempts, cap) ± jitter`. Jitter is ±25% so a
//! fleet of terminals reconnecting after the same outage does not hammer
//! the backend in lockstep.

use rand::Rng;
use std::time::Duration;

use crate::config::SyncSettings;

/// Computes retry delays from the attempt counter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First delay.
    pub base: Duration,
    /// Upper bound for the exponential growth.
    pub cap: Duration,
    /// Attempts before the entry is parked for manual intervention.
    pub max_attempts: i64,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: i64) -> Self {
        RetryPolicy {
            base,
            cap,
            max_attempts,
        }
    }

    pub fn from_settings(settings: &SyncSettings) -> Self {
        RetryPolicy {
            base: Duration::from_millis(settings.initial_backoff_ms),
            cap: Duration::from_secs(settings.max_backoff_secs),
            max_attempts: settings.max_attempts,
        }
    }

    /// True when the attempt budget is spent.
    pub fn is_exhausted(&self, attempts: i64) -> bool {
        attempts >= self.max_attempts
    }

    /// Deterministic part of the schedule: `min(base * 2^attempts, cap)`.
    pub fn delay_without_jitter(&self, attempts: i64) -> Duration {
        let shift = attempts.clamp(0, 31) as u32;
        let grown = self
            .base
            .checked_mul(1u32 << shift.min(30))
            .unwrap_or(self.cap);
        grown.min(self.cap)
    }

    /// Schedule for the next attempt after `attempts` failures, with
    /// ±25% jitter applied.
    pub fn next_delay(&self, attempts: i64) -> Duration {
        let delay = self.delay_without_jitter(attempts);
        let millis = delay.as_millis() as u64;
        if millis == 0 {
            return delay;
        }

        let jitter_span = millis / 4;
        let jittered = rand::thread_rng()
            .gen_range(millis.saturating_sub(jitter_span)..=millis + jitter_span);
        Duration::from_millis(jittered)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
