//! Caller-owned signing secrets.

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// An HMAC secret with an optional key identifier.
///
/// The bytes are zeroed on drop and never printed; `Debug` shows only the
/// key id. A `whsec_` prefix, if present, is part of the secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    key_id: Option<String>,
    bytes: Vec<u8>,
}

impl Secret {
    /// Wraps raw secret bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { key_id: None, bytes: bytes.into() }
    }

    /// Attaches a key identifier used in logs to tell rotated secrets apart.
    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Key identifier, if one was attached.
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Whether the secret holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw secret bytes for keying the MAC.
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.key_id == other.key_id
            && bool::from(self.bytes.as_slice().ct_eq(other.bytes.as_slice()))
    }
}

impl Eq for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("key_id", &self.key_id)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
