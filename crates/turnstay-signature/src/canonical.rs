//! Canonical byte encoding of a timestamped payload.

/// Separator between the timestamp and the raw body.
const SEPARATOR: u8 = b'.';

/// The exact bytes that are signed and verified.
///
/// Layout is `ASCII(timestamp) + "." + raw_body`. The body is copied
/// verbatim; it is never parsed or re-encoded, so the subscriber must feed
/// in the request body exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPayload(Vec<u8>);

impl CanonicalPayload {
    /// Encodes a timestamp and raw body.
    pub fn encode(timestamp: i64, raw_body: &[u8]) -> Self {
        let timestamp = timestamp.to_string();
        let mut bytes = Vec::with_capacity(timestamp.len() + 1 + raw_body.len());
        bytes.extend_from_slice(timestamp.as_bytes());
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(raw_body);
        Self(bytes)
    }

    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for CanonicalPayload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
