//! Per-attempt records and the final delivery result.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use turnstay_core::EventId;

use crate::{
    client::DeliveryResponse,
    error::{DeliveryError, Result},
};

/// How a delivery attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Request issued, no outcome yet.
    Pending,
    /// Subscriber answered 2xx.
    Success,
    /// Failed in a way that may succeed on retry.
    Retryable,
    /// Failed in a way no retry will fix.
    Terminal,
    /// Stopped by cancellation or deadline while in flight.
    Cancelled,
}

impl AttemptOutcome {
    /// Whether the attempt has reached a final outcome.
    pub fn is_closed(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One HTTP send of a signed envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryAttempt {
    /// Attempt number (1-based).
    pub attempt_number: u32,
    /// When the request was issued.
    pub sent_at: DateTime<Utc>,
    /// Timestamp signed into this attempt's header.
    pub signature_timestamp: i64,
    /// Final or pending outcome.
    pub outcome: AttemptOutcome,
    /// Status returned by the subscriber, if any.
    pub http_status: Option<u16>,
    /// Error message for failed attempts.
    pub error: Option<String>,
    /// Time from send to outcome.
    pub duration: Duration,
}

impl DeliveryAttempt {
    /// Opens a pending attempt.
    pub fn pending(attempt_number: u32, sent_at: DateTime<Utc>, signature_timestamp: i64) -> Self {
        Self {
            attempt_number,
            sent_at,
            signature_timestamp,
            outcome: AttemptOutcome::Pending,
            http_status: None,
            error: None,
            duration: Duration::ZERO,
        }
    }

    /// Closes the attempt as a success.
    pub fn succeed(&mut self, http_status: u16, duration: Duration) {
        self.outcome = AttemptOutcome::Success;
        self.http_status = Some(http_status);
        self.duration = duration;
    }

    /// Closes the attempt with an error, classifying it as retryable,
    /// terminal or cancelled.
    pub fn fail(&mut self, error: &DeliveryError, duration: Duration) {
        self.outcome = match error {
            DeliveryError::Cancelled { .. } => AttemptOutcome::Cancelled,
            e if e.is_retryable() => AttemptOutcome::Retryable,
            _ => AttemptOutcome::Terminal,
        };
        self.http_status = error.status_code();
        self.error = Some(error.to_string());
        self.duration = duration;
    }
}

/// Outcome of one `trigger` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    /// Event that was delivered.
    pub event_id: EventId,
    /// Whether any attempt succeeded.
    pub success: bool,
    /// Every attempt, in order.
    pub attempts: Vec<DeliveryAttempt>,
    /// Error that ended the last failed attempt.
    pub last_error: Option<DeliveryError>,
    /// Subscriber's answer to the successful attempt.
    pub response: Option<DeliveryResponse>,
}

impl DeliveryResult {
    /// Number of attempts made.
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Converts a failed result into an error.
    ///
    /// # Errors
    ///
    /// `RetriesExhausted` if the last failure was retryable, otherwise the
    /// last error itself.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }

        let attempts = self.attempt_count();
        match self.last_error {
            Some(error) if error.is_retryable() => Err(DeliveryError::retries_exhausted(attempts)),
            Some(error) => Err(error),
            None => Err(DeliveryError::internal("delivery failed without an error")),
        }
    }
}
