//! Error types for webhook delivery operations.
//!
//! Every failure a delivery attempt can end in, categorized for retry
//! decisions. Response bodies carried in errors are truncated by the client
//! before they get here; secrets and signature values never appear.

use std::fmt;

use thiserror::Error;
use turnstay_signature::VerificationError;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for webhook delivery operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Request timeout that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// HTTP response indicated client error (4xx other than 429).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// HTTP response indicated server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// HTTP 429, optionally with Retry-After guidance.
    #[error("rate limited")]
    RateLimited {
        /// Seconds to wait before retrying, from the Retry-After header
        retry_after_seconds: Option<u64>,
    },

    /// Informational or redirect status the subscriber should not send.
    #[error("unexpected status: HTTP {status_code}")]
    UnexpectedStatus {
        /// HTTP status code (1xx or 3xx)
        status_code: u16,
    },

    /// All retry attempts exhausted.
    #[error("delivery failed after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
    },

    /// Invalid destination, secret, event type or client settings.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Payload could not be signed.
    #[error("signing failed: {0}")]
    Signing(#[from] VerificationError),

    /// Delivery stopped by cancellation or deadline.
    #[error("delivery cancelled: {reason}")]
    Cancelled {
        /// What stopped the delivery
        reason: String,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a client error from HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a rate limit error with optional retry guidance.
    pub fn rate_limited(retry_after_seconds: Option<u64>) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates an unexpected status error.
    pub fn unexpected_status(status_code: u16) -> Self {
        Self::UnexpectedStatus { status_code }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(attempts: u32) -> Self {
        Self::RetriesExhausted { attempts }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled { reason: reason.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Determines if this error represents a temporary failure that should be
    /// retried.
    ///
    /// Returns `true` for network errors, timeouts, server errors (5xx), and
    /// rate limits. Everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. } => true,

            Self::ClientError { .. }
            | Self::UnexpectedStatus { .. }
            | Self::RetriesExhausted { .. }
            | Self::ConfigurationError { .. }
            | Self::Signing(_)
            | Self::Cancelled { .. }
            | Self::InternalError { .. } => false,
        }
    }

    /// Returns the suggested retry delay in seconds for retryable errors.
    ///
    /// Only rate limits carrying a Retry-After value return `Some`; `None`
    /// means standard exponential backoff applies.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => *retry_after_seconds,
            _ => None,
        }
    }

    /// HTTP status carried by the error, if the subscriber responded.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code, .. }
            | Self::ServerError { status_code, .. }
            | Self::UnexpectedStatus { status_code } => Some(*status_code),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Monitoring category for this error.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }
}

/// Category of delivery error for metrics and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues.
    Network,
    /// HTTP client errors (4xx) and unexpected statuses.
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// Rate limiting.
    RateLimit,
    /// Configuration and signing problems.
    Configuration,
    /// Cancellation or deadline.
    Cancelled,
    /// Internal system errors.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. }
            | DeliveryError::UnexpectedStatus { .. }
            | DeliveryError::RetriesExhausted { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::ConfigurationError { .. } | DeliveryError::Signing(_) => {
                Self::Configuration
            },
            DeliveryError::Cancelled { .. } => Self::Cancelled,
            DeliveryError::InternalError { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Configuration => write!(f, "configuration"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
