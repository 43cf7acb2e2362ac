//! The `Turnstay-Signature` header.
//!
//! Wire format: `t=<unix_seconds>,v1=<hex>[,v1=<hex>...]`. Whitespace around
//! items, keys and values is tolerated. Schemes other than `v1` are kept
//! but never verified, so newer producers can add schemes without breaking
//! older subscribers.

use std::{fmt, str::FromStr};

use crate::error::{Result, VerificationError};

/// HTTP header carrying the signature.
pub const SIGNATURE_HEADER: &str = "Turnstay-Signature";

/// The HMAC-SHA256 signature scheme.
pub const SCHEME_V1: &str = "v1";

/// Maximum number of signature entries accepted in one header.
pub const MAX_HEADER_ENTRIES: usize = 10;

/// Maximum accepted header length in bytes.
const MAX_HEADER_LEN: usize = 4096;

const TIMESTAMP_KEY: &str = "t";

/// One `scheme=signature` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    /// Scheme tag, e.g. `v1`.
    pub scheme: String,
    /// Hex-encoded signature.
    pub signature: String,
}

impl SignatureEntry {
    /// Creates a `v1` entry.
    pub fn v1(signature: impl Into<String>) -> Self {
        Self { scheme: SCHEME_V1.to_string(), signature: signature.into() }
    }
}

/// Parsed signature header.
///
/// Carries no secret material; `entries` keeps header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Signing time in unix seconds.
    pub timestamp: i64,
    /// Signature entries in header order.
    pub entries: Vec<SignatureEntry>,
}

impl SignatureHeader {
    /// Creates a header with no entries.
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp, entries: Vec::new() }
    }

    /// Appends an entry.
    pub fn push(&mut self, entry: SignatureEntry) {
        self.entries.push(entry);
    }

    /// Signatures for the given scheme, in header order.
    pub fn signatures<'a>(&'a self, scheme: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.scheme == scheme)
            .map(|entry| entry.signature.as_str())
    }

    /// Parses a header value.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::MalformedHeader` if the timestamp is
    /// missing, repeated or not an integer, if there is no `v1` entry, or if
    /// the header is oversized or carries more than [`MAX_HEADER_ENTRIES`]
    /// signatures.
    pub fn parse(header: &str) -> Result<Self> {
        if header.len() > MAX_HEADER_LEN {
            return Err(VerificationError::malformed_header("header too long"));
        }

        let mut timestamp = None;
        let mut entries = Vec::new();

        for item in header.split(',') {
            let Some((key, value)) = item.trim().split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            if key == TIMESTAMP_KEY {
                if timestamp.is_some() {
                    return Err(VerificationError::malformed_header(
                        "timestamp appears more than once",
                    ));
                }
                let parsed = value.parse::<i64>().map_err(|_| {
                    VerificationError::malformed_header("timestamp is not a valid integer")
                })?;
                timestamp = Some(parsed);
                continue;
            }

            if entries.len() == MAX_HEADER_ENTRIES {
                return Err(VerificationError::malformed_header(format!(
                    "more than {MAX_HEADER_ENTRIES} signature entries"
                )));
            }
            entries.push(SignatureEntry { scheme: key.to_string(), signature: value.to_string() });
        }

        let Some(timestamp) = timestamp else {
            return Err(VerificationError::malformed_header("missing timestamp"));
        };

        let header = Self { timestamp, entries };
        if header.signatures(SCHEME_V1).next().is_none() {
            return Err(VerificationError::malformed_header("no v1 signature found"));
        }

        Ok(header)
    }
}

impl FromStr for SignatureHeader {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SignatureHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TIMESTAMP_KEY}={}", self.timestamp)?;
        for entry in &self.entries {
            write!(f, ",{}={}", entry.scheme, entry.signature)?;
        }
        Ok(())
    }
}
