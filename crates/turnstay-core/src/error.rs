//! Error types for envelope construction and encoding.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failures raised while building or encoding an event envelope.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Event type is not a dotted, namespaced identifier.
    #[error("invalid event type {event_type:?}: {reason}")]
    InvalidEventType {
        /// The rejected event type
        event_type: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Envelope could not be encoded or decoded as JSON.
    #[error("envelope serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
