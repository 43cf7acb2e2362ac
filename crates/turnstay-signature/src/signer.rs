//! HMAC-SHA256 signing over canonical payloads.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    canonical::CanonicalPayload,
    error::{Result, VerificationError},
    header::{SignatureEntry, SignatureHeader},
    secret::Secret,
};

type HmacSha256 = Hmac<Sha256>;

/// Signs `(timestamp, raw_body)` with one secret.
///
/// Returns the lowercase hex HMAC-SHA256 of the canonical bytes. The result
/// depends only on the inputs.
///
/// # Errors
///
/// Returns `VerificationError::InvalidSecret` if the secret is empty.
///
/// # Example
///
/// ```
/// use turnstay_signature::{sign, Secret};
///
/// let secret = Secret::from("whsec_test");
/// let a = sign(&secret, 1_700_000_000, br#"{"id":"evt_1"}"#).unwrap();
/// let b = sign(&secret, 1_700_000_000, br#"{"id":"evt_1"}"#).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
pub fn sign(secret: &Secret, timestamp: i64, raw_body: &[u8]) -> Result<String> {
    let canonical = CanonicalPayload::encode(timestamp, raw_body);
    Ok(hex::encode(compute_mac(secret, &canonical)?))
}

/// Builds a signature header with one `v1` entry per secret.
///
/// Producers pass a single secret in steady state and two while cutting
/// over, so subscribers holding either secret accept the message.
///
/// # Errors
///
/// Returns `VerificationError::Configuration` for an empty secret list and
/// `VerificationError::InvalidSecret` if any secret is empty.
pub fn sign_header(
    secrets: &[Secret],
    timestamp: i64,
    raw_body: &[u8],
) -> Result<SignatureHeader> {
    if secrets.is_empty() {
        return Err(VerificationError::configuration("at least one signing secret is required"));
    }

    let canonical = CanonicalPayload::encode(timestamp, raw_body);
    let mut header = SignatureHeader::new(timestamp);
    for secret in secrets {
        header.push(SignatureEntry::v1(hex::encode(compute_mac(secret, &canonical)?)));
    }

    Ok(header)
}

/// Computes the raw MAC over already-encoded canonical bytes.
pub(crate) fn compute_mac(secret: &Secret, canonical: &CanonicalPayload) -> Result<Vec<u8>> {
    if secret.is_empty() {
        return Err(VerificationError::InvalidSecret);
    }

    let mut mac = HmacSha256::new_from_slice(secret.expose())
        .map_err(|_| VerificationError::InvalidSecret)?;
    mac.update(canonical.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Producer-side signer holding the active secret.
#[derive(Debug, Clone)]
pub struct Signer {
    secret: Secret,
}

impl Signer {
    /// Creates a signer for one active secret.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::InvalidSecret` if the secret is empty.
    pub fn new(secret: Secret) -> Result<Self> {
        if secret.is_empty() {
            return Err(VerificationError::InvalidSecret);
        }
        Ok(Self { secret })
    }

    /// The active secret.
    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// Hex signature for `(timestamp, raw_body)`.
    ///
    /// # Errors
    ///
    /// Never fails for a signer built through [`Signer::new`]; the `Result`
    /// mirrors [`sign`].
    pub fn sign(&self, timestamp: i64, raw_body: &[u8]) -> Result<String> {
        sign(&self.secret, timestamp, raw_body)
    }

    /// Complete header value for `(timestamp, raw_body)`.
    ///
    /// # Errors
    ///
    /// Same as [`Signer::sign`].
    pub fn header(&self, timestamp: i64, raw_body: &[u8]) -> Result<SignatureHeader> {
        sign_header(std::slice::from_ref(&self.secret), timestamp, raw_body)
    }
}
