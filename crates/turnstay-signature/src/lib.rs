//! Canonical signing and verification of Turnstay webhook payloads.
//!
//! Producers sign `"<timestamp>.<raw body>"` with HMAC-SHA256 and send the
//! result in the `Turnstay-Signature` header. Subscribers hand the untouched
//! request body and that header to [`Verifier`], which checks freshness and
//! the signature against every configured secret before parsing the body
//! into an [`EventEnvelope`](turnstay_core::EventEnvelope).
//!
//! # Example
//!
//! ```
//! use turnstay_core::{Clock, RealClock};
//! use turnstay_signature::{sign_header, Secret, Verifier};
//!
//! let secret = Secret::from("whsec_example");
//! let body = br#"{"id":"evt_1","type":"payout.completed","created":0,"data":{"object":{}}}"#;
//! let header = sign_header(&[secret.clone()], RealClock.unix_seconds(), body).unwrap();
//!
//! let verifier = Verifier::new(vec![secret]).unwrap();
//! let event = verifier.construct_from(body, &header.to_string()).unwrap();
//! assert_eq!(event.event_type, "payout.completed");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod canonical;
pub mod error;
pub mod header;
pub mod secret;
pub mod signer;
pub mod verifier;

pub use canonical::CanonicalPayload;
pub use error::{ErrorCategory, Result, VerificationError};
pub use header::{SignatureEntry, SignatureHeader, MAX_HEADER_ENTRIES, SCHEME_V1, SIGNATURE_HEADER};
pub use secret::Secret;
pub use signer::{sign, sign_header, Signer};
pub use verifier::{
    construct_event, Tolerance, VerifiedSignature, Verifier, DEFAULT_TOLERANCE_SECONDS,
};
