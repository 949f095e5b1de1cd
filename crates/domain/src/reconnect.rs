//! Reconnection policy — exponential backoff with a ceiling and a retry cap.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Decision returned by [`ReconnectionPolicy::next_delay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait this long, then try again.
    Retry(Duration),
    /// Stop retrying; the adapter becomes failed.
    GiveUp,
}

/// Exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`,
/// giving up once `attempt >= max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectionPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    jitter_ratio: f64,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        ReconnectSettings::default().policy()
    }
}

impl ReconnectionPolicy {
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_attempts,
            jitter_ratio: 0.0,
        }
    }

    /// Spread retries by up to `ratio` of the delay in either direction.
    /// Clamped to `[0, 1]`.
    #[must_use]
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// Deterministic and non-decreasing in `attempt`; see
    /// [`jittered`](Self::jittered) for the randomized form.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Backoff {
        if attempt >= self.max_attempts {
            return Backoff::GiveUp;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        Backoff::Retry(delay)
    }

    /// Apply the configured jitter to `delay`.
    pub fn jittered(&self, delay: Duration, rng: &mut impl Rng) -> Duration {
        if self.jitter_ratio <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rng.gen_range(-self.jitter_ratio..=self.jitter_ratio);
        delay.mul_f64(factor)
    }
}

/// Serde-facing reconnection settings shared by every adapter config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Delay before the first retry, in seconds.
    pub base_delay_secs: u64,
    /// Upper bound of any single delay, in seconds.
    pub max_delay_secs: u64,
    /// Retries before giving up.
    pub max_attempts: u32,
    /// Relative jitter applied to each delay (`0.1` = ±10 %).
    pub jitter: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            max_delay_secs: 300,
            max_attempts: 10,
            jitter: 0.1,
        }
    }
}

impl ReconnectSettings {
    #[must_use]
    pub fn policy(&self) -> ReconnectionPolicy {
        ReconnectionPolicy::new(
            Duration::from_secs(self.base_delay_secs),
            Duration::from_secs(self.max_delay_secs),
            self.max_attempts,
        )
        .with_jitter(self.jitter)
    }
}
