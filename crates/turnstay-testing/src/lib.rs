//! Test infrastructure for Turnstay webhooks.
//!
//! Provides a wiremock-backed subscriber that records and verifies what it
//! receives, a scripted [`Transport`](turnstay_delivery::Transport) for
//! deterministic retry tests, and builders for signed payloads.

#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod fixtures;
pub mod http;
pub mod transport;

pub use fixtures::{SignedPayload, SignedPayloadBuilder, TEST_SECRET, TEST_TIMESTAMP};
pub use http::{MockEndpoint, MockResponse, MockSequenceBuilder, MockServer, RecordedRequest};
pub use transport::{ScriptedOutcome, ScriptedTransport};
pub use turnstay_core::{Clock, TestClock};
