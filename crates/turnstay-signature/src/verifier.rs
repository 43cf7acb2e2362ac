//! Subscriber-side verification of signed webhook payloads.
//!
//! Verification runs in a fixed order: parse the header, check freshness,
//! compare every `v1` signature against every secret in constant time, and
//! only then decode the body. A body that fails to decode after a valid
//! signature is reported as `MalformedPayload`, not as a forgery.

use std::sync::Arc;

use subtle::{Choice, ConstantTimeEq};
use tracing::debug;
use turnstay_core::{Clock, EventEnvelope, RealClock};

use crate::{
    canonical::CanonicalPayload,
    error::{Result, VerificationError},
    header::{SignatureHeader, SCHEME_V1},
    secret::Secret,
    signer::compute_mac,
};

/// Default freshness window in seconds.
pub const DEFAULT_TOLERANCE_SECONDS: u64 = 300;

/// How far a signature timestamp may drift from the verifier's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tolerance {
    /// Accept any timestamp.
    Disabled,
    /// Accept timestamps within this many seconds of now, in either
    /// direction.
    Within(u64),
}

impl Tolerance {
    /// Maps a seconds value to a tolerance, treating zero as disabled.
    pub fn from_seconds(seconds: u64) -> Self {
        if seconds == 0 {
            Self::Disabled
        } else {
            Self::Within(seconds)
        }
    }

    fn check(self, now: i64, timestamp: i64) -> Result<()> {
        let Self::Within(tolerance_seconds) = self else {
            return Ok(());
        };

        let age_seconds = now.abs_diff(timestamp);
        if age_seconds > tolerance_seconds {
            return Err(VerificationError::ExpiredSignature { age_seconds, tolerance_seconds });
        }
        Ok(())
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::Within(DEFAULT_TOLERANCE_SECONDS)
    }
}

/// Details of a successful signature check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    /// Timestamp the producer signed.
    pub timestamp: i64,
    /// Position of the first matching secret in the verifier's list.
    pub secret_index: usize,
    /// Key id of that secret, if it has one.
    pub key_id: Option<String>,
}

/// Verifies webhook signatures against an ordered set of secrets.
///
/// Secrets are listed newest first. Any match is accepted; the first
/// matching secret is reported for logging.
#[derive(Debug, Clone)]
pub struct Verifier {
    secrets: Vec<Secret>,
    tolerance: Tolerance,
    clock: Arc<dyn Clock>,
}

impl Verifier {
    /// Creates a verifier with the default tolerance and the system clock.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::Configuration` if `secrets` is empty or
    /// contains an empty secret.
    pub fn new(secrets: Vec<Secret>) -> Result<Self> {
        if secrets.is_empty() {
            return Err(VerificationError::configuration("no verification secrets configured"));
        }
        if let Some(position) = secrets.iter().position(Secret::is_empty) {
            return Err(VerificationError::configuration(format!(
                "verification secret at position {position} is empty"
            )));
        }

        Ok(Self { secrets, tolerance: Tolerance::default(), clock: Arc::new(RealClock) })
    }

    /// Sets the freshness tolerance.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Replaces the clock used for freshness checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configured tolerance.
    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Checks the signature over the raw request body.
    ///
    /// # Errors
    ///
    /// - `MalformedHeader` if the header cannot be parsed
    /// - `ExpiredSignature` if the timestamp is outside the tolerance
    /// - `SignatureMismatch` if no signature matches any secret
    pub fn verify_signature(&self, payload: &[u8], header: &str) -> Result<VerifiedSignature> {
        let header = SignatureHeader::parse(header).inspect_err(log_rejection)?;
        self.tolerance
            .check(self.clock.unix_seconds(), header.timestamp)
            .inspect_err(log_rejection)?;

        let canonical = CanonicalPayload::encode(header.timestamp, payload);
        let mut first_match = None;

        // Every pair is compared; no early exit on a hit.
        for (index, secret) in self.secrets.iter().enumerate() {
            let expected = hex::encode(compute_mac(secret, &canonical)?);
            let mut hit = Choice::from(0);
            for candidate in header.signatures(SCHEME_V1) {
                hit |= expected.as_bytes().ct_eq(candidate.as_bytes());
            }
            if bool::from(hit) && first_match.is_none() {
                first_match = Some(index);
            }
        }

        let Some(secret_index) = first_match else {
            let error = VerificationError::SignatureMismatch;
            log_rejection(&error);
            return Err(error);
        };

        let key_id = self.secrets[secret_index].key_id().map(str::to_string);
        debug!(
            timestamp = header.timestamp,
            secret_index,
            key_id = key_id.as_deref().unwrap_or("-"),
            "webhook signature verified"
        );

        Ok(VerifiedSignature { timestamp: header.timestamp, secret_index, key_id })
    }

    /// Verifies the raw body and parses it into an event envelope.
    ///
    /// `payload` must be the request body exactly as received.
    ///
    /// # Errors
    ///
    /// Everything [`Verifier::verify_signature`] returns, plus
    /// `MalformedPayload` if an authentic body is not an envelope.
    pub fn construct_from(&self, payload: &[u8], header: &str) -> Result<EventEnvelope> {
        self.verify_signature(payload, header)?;

        EventEnvelope::from_json_slice(payload).map_err(|e| {
            let error = VerificationError::malformed_payload(e.to_string());
            log_rejection(&error);
            error
        })
    }
}

/// Verifies and parses a webhook in one call.
///
/// # Errors
///
/// `Configuration` if `secrets` is empty, otherwise the same as
/// [`Verifier::construct_from`].
pub fn construct_event(
    payload: &[u8],
    header: &str,
    secrets: &[Secret],
    tolerance: Tolerance,
) -> Result<EventEnvelope> {
    Verifier::new(secrets.to_vec())?.with_tolerance(tolerance).construct_from(payload, header)
}

fn log_rejection(error: &VerificationError) {
    debug!(category = %error.category(), error = %error, "webhook rejected");
}

#[cfg(test)]
mod tests {
    use turnstay_core::TestClock;

    use super::*;
    use crate::signer::{sign, sign_header};

    const NOW: u64 = 1_700_000_000;
    const BODY: &[u8] =
        br#"{"id":"evt_1","type":"payment_intent.succeeded","created":1700000000,"data":{"object":{"id":"pi_1"}}}"#;

    fn verifier(secrets: Vec<Secret>) -> Verifier {
        Verifier::new(secrets).unwrap().with_clock(Arc::new(TestClock::at_unix(NOW)))
    }

    fn header_for(secret: &str, timestamp: i64, body: &[u8]) -> String {
        format!("t={timestamp},v1={}", sign(&Secret::from(secret), timestamp, body).unwrap())
    }

    #[test]
    fn accepts_valid_signature() {
        let header = header_for("whsec_a", NOW as i64, BODY);
        let event = verifier(vec![Secret::from("whsec_a")]).construct_from(BODY, &header).unwrap();

        assert_eq!(event.event_type, "payment_intent.succeeded");
        assert_eq!(event.data.object["id"], "pi_1");
    }

    #[test]
    fn empty_secret_list_is_configuration_error() {
        assert!(matches!(Verifier::new(vec![]), Err(VerificationError::Configuration { .. })));
        assert!(matches!(
            construct_event(BODY, "garbage", &[], Tolerance::default()),
            Err(VerificationError::Configuration { .. })
        ));
    }

    #[test]
    fn empty_secret_in_list_is_configuration_error() {
        let err = Verifier::new(vec![Secret::from("a"), Secret::from("")]).unwrap_err();
        assert!(err.to_string().contains("position 1"));
    }

    #[test]
    fn wrong_secret_is_mismatch() {
        let header = header_for("whsec_a", NOW as i64, BODY);
        let err =
            verifier(vec![Secret::from("whsec_b")]).construct_from(BODY, &header).unwrap_err();
        assert_eq!(err, VerificationError::SignatureMismatch);
    }

    #[test]
    fn reports_first_matching_secret() {
        let secrets =
            [Secret::from("new").with_key_id("k2"), Secret::from("old").with_key_id("k1")];
        let header = sign_header(&secrets, NOW as i64, BODY).unwrap().to_string();

        let verified = verifier(secrets.to_vec()).verify_signature(BODY, &header).unwrap();
        assert_eq!(verified.secret_index, 0);
        assert_eq!(verified.key_id.as_deref(), Some("k2"));
    }

    #[test]
    fn uppercase_hex_does_not_match() {
        let signature = sign(&Secret::from("s"), NOW as i64, BODY).unwrap().to_uppercase();
        let header = format!("t={NOW},v1={signature}");

        let err = verifier(vec![Secret::from("s")]).verify_signature(BODY, &header).unwrap_err();
        assert_eq!(err, VerificationError::SignatureMismatch);
    }

    #[test]
    fn malformed_header_checked_before_signature() {
        let err = verifier(vec![Secret::from("s")]).verify_signature(BODY, "t=12345").unwrap_err();
        assert!(matches!(err, VerificationError::MalformedHeader { .. }));
    }

    #[test]
    fn expiry_checked_before_signature() {
        // A forged signature with a stale timestamp reports expiry.
        let header = format!("t={},v1=deadbeef", NOW - 600);
        let err = verifier(vec![Secret::from("s")]).verify_signature(BODY, &header).unwrap_err();
        assert!(matches!(err, VerificationError::ExpiredSignature { age_seconds: 600, .. }));
    }

    #[test]
    fn disabled_tolerance_accepts_any_age() {
        let header = header_for("s", NOW as i64 - 99_999, BODY);
        let verifier = verifier(vec![Secret::from("s")]).with_tolerance(Tolerance::from_seconds(0));

        assert_eq!(verifier.tolerance(), Tolerance::Disabled);
        assert!(verifier.construct_from(BODY, &header).is_ok());
    }

    #[test]
    fn authentic_but_malformed_body() {
        let body = br#"{"hello":"world"}"#;
        let header = header_for("s", NOW as i64, body);

        let err = verifier(vec![Secret::from("s")]).construct_from(body, &header).unwrap_err();
        assert!(matches!(err, VerificationError::MalformedPayload { .. }));
    }

    #[test]
    fn tolerance_check_is_symmetric() {
        let tolerance = Tolerance::Within(300);
        assert!(tolerance.check(1_000, 700).is_ok());
        assert!(tolerance.check(1_000, 1_300).is_ok());
        assert!(tolerance.check(1_000, 699).is_err());
        assert!(tolerance.check(1_000, 1_301).is_err());
        assert!(tolerance.check(i64::MAX, i64::MIN).is_err());
    }
}
