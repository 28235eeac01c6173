//! Reconnect delays: exponential growth, proportional jitter, hard cap.

use rand::Rng;
use std::time::Duration;

/// Backoff policy.
///
/// The delay for attempt `n` (starting at 1) is
/// `min(base * 2^(n-1) + U[0, jitter * base * 2^(n-1)], cap)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry, without jitter.
    pub base: Duration,
    /// Upper bound on any delay.
    pub cap: Duration,
    /// Jitter as a fraction of the exponential delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.5,
        }
    }
}

impl Backoff {
    /// Delay for `attempt` without jitter.
    #[must_use]
    pub fn exponential(&self, attempt: u32) -> Duration {
        let factor = 2u32
            .checked_pow(attempt.max(1) - 1)
            .unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Delay for `attempt`, with jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self.exponential(attempt);
        let ratio = self.jitter.clamp(0.0, 1.0);
        if ratio == 0.0 {
            return exponential;
        }

        let jitter = exponential.mul_f64(rand::rng().random_range(0.0..=ratio));
        exponential.saturating_add(jitter).min(self.cap)
    }
}
