//! Error types for signing and verification.
//!
//! Messages describe what was wrong with the input, never the input itself:
//! no secret bytes and no signature values appear in any variant.

use std::fmt;

use thiserror::Error;

/// Result type alias for signing and verification.
pub type Result<T> = std::result::Result<T, VerificationError>;

/// Failures raised while signing or verifying a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// Caller supplied no usable secrets.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is wrong with the configuration
        message: String,
    },

    /// A signing secret was empty.
    #[error("invalid secret: signing secret must not be empty")]
    InvalidSecret,

    /// Signature header could not be parsed.
    #[error("malformed signature header: {reason}")]
    MalformedHeader {
        /// Which structural rule the header broke
        reason: String,
    },

    /// Signature timestamp is too far in the past or the future.
    #[error("signature timestamp is {age_seconds}s from now, tolerance is {tolerance_seconds}s")]
    ExpiredSignature {
        /// Distance between the signature timestamp and now
        age_seconds: u64,
        /// Configured tolerance
        tolerance_seconds: u64,
    },

    /// No signature in the header matched any secret.
    #[error("no signature matched any configured secret")]
    SignatureMismatch,

    /// Signature was valid but the body is not an event envelope.
    #[error("malformed payload: {reason}")]
    MalformedPayload {
        /// Decoder error describing the shape mismatch
        reason: String,
    },
}

impl VerificationError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a malformed header error.
    pub fn malformed_header(reason: impl Into<String>) -> Self {
        Self::MalformedHeader { reason: reason.into() }
    }

    /// Creates a malformed payload error.
    pub fn malformed_payload(reason: impl Into<String>) -> Self {
        Self::MalformedPayload { reason: reason.into() }
    }

    /// Monitoring category for this error.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }
}

/// Category of verification failure for metrics and alerting.
///
/// Forgery attempts and clock skew land in different buckets so they can be
/// alerted on separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad or missing secrets on our side.
    Configuration,
    /// Structurally invalid header or body.
    Malformed,
    /// Stale or future-dated timestamp.
    Expired,
    /// Signature did not match.
    Forgery,
}

impl From<&VerificationError> for ErrorCategory {
    fn from(error: &VerificationError) -> Self {
        match error {
            VerificationError::Configuration { .. } | VerificationError::InvalidSecret => {
                Self::Configuration
            },
            VerificationError::MalformedHeader { .. }
            | VerificationError::MalformedPayload { .. } => Self::Malformed,
            VerificationError::ExpiredSignature { .. } => Self::Expired,
            VerificationError::SignatureMismatch => Self::Forgery,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Malformed => write!(f, "malformed"),
            Self::Expired => write!(f, "expired"),
            Self::Forgery => write!(f, "forgery"),
        }
    }
}
