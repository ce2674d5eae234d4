//! Retry backoff with additive jitter.
//!
//! Attempt `n` (1-indexed) that fails waits `factor * 2^(n-1)` seconds, plus
//! a random jitter in `[0, delay * jitter_ratio]`, before attempt `n + 1`.

use crate::config::EngineConfig;
use crate::errors::StepError;
use rand::Rng;
use std::time::Duration;

/// Base delay after failed attempt `attempt` (1-indexed), without jitter.
#[must_use]
pub fn base_delay(attempt: u32, factor: f64) -> Duration {
    if factor <= 0.0 {
        return Duration::ZERO;
    }
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let secs = factor * 2f64.powi(exponent);
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No attempts left, give up.
    GiveUp,
    /// The error is not retryable.
    NotRetryable,
}

/// Backoff settings shared by every node of an engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Jitter upper bound as a fraction of the base delay.
    pub jitter_ratio: f64,
    /// Optional cap on the base delay.
    pub max_delay: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            jitter_ratio: 0.5,
            max_delay: None,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy from engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            jitter_ratio: config.jitter_ratio,
            max_delay: config.max_backoff_ms.map(Duration::from_millis),
        }
    }

    /// Creates a policy without jitter or cap.
    #[must_use]
    pub fn deterministic() -> Self {
        Self {
            jitter_ratio: 0.0,
            max_delay: None,
        }
    }

    /// Base delay after `attempt`, with the cap applied.
    #[must_use]
    pub fn capped_delay(&self, attempt: u32, factor: f64) -> Duration {
        let delay = base_delay(attempt, factor);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Full delay after `attempt`: capped base delay plus random jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32, factor: f64) -> Duration {
        let delay = self.capped_delay(attempt, factor);
        let upper = delay.as_secs_f64() * self.jitter_ratio;
        if upper <= 0.0 || !upper.is_finite() {
            return delay;
        }

        let jitter = rand::thread_rng().gen_range(0.0..=upper);
        delay.saturating_add(Duration::try_from_secs_f64(jitter).unwrap_or(Duration::ZERO))
    }

    /// Decides what follows failed attempt `attempt` of `max_attempts`.
    #[must_use]
    pub fn decide(
        &self,
        attempt: u32,
        max_attempts: u32,
        factor: f64,
        error: &StepError,
    ) -> RetryDecision {
        if !error.is_retryable() {
            RetryDecision::NotRetryable
        } else if attempt >= max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(self.delay(attempt, factor))
        }
    }
}
