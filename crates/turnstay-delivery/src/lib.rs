//! Signed webhook delivery with retries, backoff and cancellation.
//!
//! [`WebhookClient::trigger`] builds an event envelope, serializes it once,
//! signs it and POSTs it to a subscriber. Failed attempts are classified and
//! retried with exponential backoff until they succeed, hit a terminal
//! error, exhaust the retry budget, or are cancelled.
//!
//! # Retry classification
//!
//! - **Retried**: network failures, timeouts, 5xx, 429 (honouring
//!   Retry-After up to the policy's maximum delay)
//! - **Terminal**: other 4xx, 1xx and 3xx, signing and configuration errors
//!
//! The body and event id are identical on every attempt so subscribers can
//! deduplicate; the signature header is re-signed per attempt unless
//! [`SigningMode::Idempotent`] is selected.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use turnstay_delivery::{TriggerOptions, WebhookClient, DEFAULT_TRIGGER_PATH};
//! use turnstay_signature::Secret;
//!
//! # async fn example() -> turnstay_delivery::Result<()> {
//! let client = WebhookClient::builder().base_url("https://hooks.example.com").build()?;
//! let secret = Secret::from("whsec_example");
//!
//! let result = client
//!     .trigger(
//!         DEFAULT_TRIGGER_PATH,
//!         "payment_intent.succeeded",
//!         json!({"id": "pi_example_123", "amount": 1000}),
//!         &secret,
//!         TriggerOptions::default(),
//!     )
//!     .await?;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attempt;
pub mod client;
pub mod config;
pub mod error;
pub mod observer;
pub mod retry;
pub mod trigger;

pub use attempt::{AttemptOutcome, DeliveryAttempt, DeliveryResult};
pub use client::{
    extract_retry_after_seconds, ClientConfig, DeliveryClient, DeliveryRequest, DeliveryResponse,
    Transport, DELIVERY_ATTEMPT_HEADER, EVENT_ID_HEADER, EVENT_NAME_HEADER,
};
pub use config::Config;
pub use error::{DeliveryError, ErrorCategory, Result};
pub use observer::{AttemptObserver, MulticastObserver, NoOpObserver};
pub use retry::{RetryContext, RetryDecision, RetryPolicy};
pub use trigger::{
    SigningMode, TriggerOptions, WebhookClient, WebhookClientBuilder, DEFAULT_TRIGGER_PATH,
};
