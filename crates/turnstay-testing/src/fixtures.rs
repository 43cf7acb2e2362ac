//! Signed payload builders for verification tests.

use bytes::Bytes;
use serde_json::{json, Value};
use turnstay_core::{EventData, EventEnvelope};
use turnstay_signature::{sign_header, Secret};

/// Secret used by fixtures unless overridden.
pub const TEST_SECRET: &str = "whsec_test";

/// Unix second fixtures sign at unless overridden.
pub const TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Builder for signed webhook payloads.
#[derive(Debug, Clone)]
pub struct SignedPayloadBuilder {
    event_id: String,
    event_type: String,
    object: Value,
    body: Option<Bytes>,
    timestamp: i64,
    secrets: Vec<Secret>,
}

impl SignedPayloadBuilder {
    /// Creates a builder for a `payment_intent.succeeded` event signed with
    /// [`TEST_SECRET`] at [`TEST_TIMESTAMP`].
    pub fn new() -> Self {
        Self {
            event_id: "evt_test_1".to_string(),
            event_type: "payment_intent.succeeded".to_string(),
            object: json!({"id": "pi_example_123", "amount": 1000, "currency": "usd"}),
            body: None,
            timestamp: TEST_TIMESTAMP,
            secrets: vec![Secret::from(TEST_SECRET)],
        }
    }

    /// Sets the event id.
    #[must_use]
    pub fn event_id(mut self, id: impl Into<String>) -> Self {
        self.event_id = id.into();
        self
    }

    /// Sets the event type.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Sets `data.object`.
    #[must_use]
    pub fn object(mut self, object: Value) -> Self {
        self.object = object;
        self
    }

    /// Signs these exact bytes instead of a rendered envelope.
    #[must_use]
    pub fn raw_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the signature timestamp.
    #[must_use]
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replaces the signing secrets; one `v1` entry is emitted per secret.
    #[must_use]
    pub fn secrets<I, S>(mut self, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Secret>,
    {
        self.secrets = secrets.into_iter().map(Into::into).collect();
        self
    }

    /// Renders the body and signs it.
    pub fn build(self) -> SignedPayload {
        let body = self.body.unwrap_or_else(|| {
            let envelope = EventEnvelope::new(
                self.event_type.as_str(),
                EventData::new(self.object.clone()),
                self.timestamp,
            )
            .expect("fixture event type must be valid")
            .with_id(self.event_id.as_str());
            Bytes::from(envelope.to_json_bytes().expect("fixture envelope must serialize"))
        });

        let header = sign_header(&self.secrets, self.timestamp, &body)
            .expect("fixture secrets must be valid")
            .to_string();

        SignedPayload { body, header, timestamp: self.timestamp }
    }
}

impl Default for SignedPayloadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A body together with its signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    /// Raw body bytes.
    pub body: Bytes,
    /// `Turnstay-Signature` header value.
    pub header: String,
    /// Timestamp that was signed.
    pub timestamp: i64,
}

impl SignedPayload {
    /// Returns a copy of the body with one byte flipped.
    pub fn tampered_body(&self, index: usize) -> Vec<u8> {
        let mut body = self.body.to_vec();
        let len = body.len().max(1);
        if let Some(byte) = body.get_mut(index % len) {
            *byte ^= 0x01;
        }
        body
    }
}
