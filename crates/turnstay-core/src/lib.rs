//! Core domain model for Turnstay webhooks.
//!
//! Defines the event envelope that producers sign and subscribers verify,
//! the strongly-typed event identifier, and the clock abstraction shared by
//! the signing and delivery crates. Nothing in this crate touches the
//! network or secret material.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{validate_event_type, EventData, EventEnvelope, EventId, EVENT_OBJECT};
pub use time::{Clock, RealClock, TestClock};
