//! Exponential backoff with jitter.
//!
//! Decides whether a failed attempt is retried and how long to wait first.
//! A `Retry-After` value from a 429 response replaces the computed delay,
//! capped by the policy maximum.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy configuration for webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (including initial attempt).
    pub max_attempts: u32,

    /// Base delay for exponential backoff calculation.
    pub base_delay: Duration,

    /// Maximum delay between retry attempts.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1, // ±10% randomization
        }
    }
}

impl RetryPolicy {
    /// Exponential policy with `max_retries` retries after the first attempt.
    pub fn with_retries(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_retries.saturating_add(1), base_delay, ..Self::default() }
    }

    /// Policy that makes a single attempt.
    pub fn no_retries() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Disables jitter, for reproducible schedules.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Retry decision context for a failed delivery attempt.
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    /// Attempt number that just failed (1-based).
    pub attempt_number: u32,
    /// Error that caused the delivery failure.
    pub error: &'a DeliveryError,
    /// Retry policy to apply.
    pub policy: &'a RetryPolicy,
}

/// Result of retry decision calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the delivery after waiting.
    Retry {
        /// How long to wait before the next attempt
        delay: Duration,
    },
    /// Do not retry - delivery permanently failed.
    GiveUp {
        /// Reason why the delivery should not be retried
        reason: String,
    },
}

impl<'a> RetryContext<'a> {
    /// Creates a new retry context for a failed delivery.
    pub fn new(attempt_number: u32, error: &'a DeliveryError, policy: &'a RetryPolicy) -> Self {
        Self { attempt_number, error, policy }
    }

    /// Determines if and when to retry based on the failure context.
    pub fn decide_retry(&self) -> RetryDecision {
        if !self.error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", self.error),
            };
        }

        if self.attempt_number >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.policy.max_attempts),
            };
        }

        RetryDecision::Retry { delay: self.calculate_delay() }
    }

    /// Calculates the delay until the next retry attempt.
    fn calculate_delay(&self) -> Duration {
        if let Some(retry_after_seconds) = self.error.retry_after_seconds() {
            return Duration::from_secs(retry_after_seconds).min(self.policy.max_delay);
        }

        // Delay doubles each attempt.
        let exponent = self.attempt_number.saturating_sub(1).min(20);
        let base_delay = self.policy.base_delay.saturating_mul(2_u32.saturating_pow(exponent));

        let capped_delay = std::cmp::min(base_delay, self.policy.max_delay);

        let jittered_delay = apply_jitter(capped_delay, self.policy.jitter_factor);

        std::cmp::min(jittered_delay, self.policy.max_delay)
    }
}

/// Applies jitter to a duration to prevent thundering herd effects.
///
/// Randomizes the delay by ±jitter_factor percentage. For example, with
/// jitter_factor=0.1, a 10s delay becomes 9s to 11s randomly.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
