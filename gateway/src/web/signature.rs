//! Stripe webhook signature verification.
//!
//! Stripe signs webhook requests using HMAC-SHA256 over `"<timestamp>.<body>"`
//! and sends the result in the `Stripe-Signature` header. The timestamp is
//! hashed exactly as it appears in the header.
//! Reference: https://stripe.com/docs/webhooks/signatures#verify-manually

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Name of the header carrying the signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Default tolerance between the signed timestamp and the current time.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Parsed `Stripe-Signature` header.
///
/// Format: `t=<timestamp>,v1=<hex>[,v1=<hex>...][,v0=<hex>]`. Stripe sends more
/// than one `v1` entry while a signing secret is being rolled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp when Stripe signed the payload.
    pub timestamp: i64,
    /// The `t` value as sent, which is what the signature covers.
    pub timestamp_raw: String,
    /// Decoded v1 (HMAC-SHA256) signatures.
    pub v1_signatures: Vec<Vec<u8>>,
    /// Decoded legacy v0 signature. Parsed, never trusted.
    pub v0_signature: Option<Vec<u8>>,
}

impl SignatureHeader {
    /// Parse the raw header value. Returns `None` for anything malformed.
    pub fn parse(header: &str) -> Option<Self> {
        if header.trim().is_empty() {
            return None;
        }

        let mut timestamp = None;
        let mut timestamp_raw = None;
        let mut v1_signatures = Vec::new();
        let mut v0_signature = None;

        for part in header.split(',') {
            let (key, value) = part.split_once('=')?;
            let value = value.trim();
            match key.trim() {
                "t" => {
                    timestamp = Some(value.parse::<i64>().ok()?);
                    timestamp_raw = Some(value.to_string());
                }
                "v1" => v1_signatures.push(hex::decode(value).ok()?),
                "v0" => v0_signature = Some(hex::decode(value).ok()?),
                // Unknown schemes are ignored for forward compatibility
                _ => {}
            }
        }

        if v1_signatures.is_empty() {
            return None;
        }

        Some(Self {
            timestamp: timestamp?,
            timestamp_raw: timestamp_raw?,
            v1_signatures,
            v0_signature,
        })
    }
}

/// Verify a Stripe webhook signature.
///
/// # Arguments
///
/// * `header` - Raw `Stripe-Signature` header value
/// * `payload` - Raw request body, exactly as received
/// * `secret` - Webhook signing secret
/// * `now` - Current Unix time in seconds
/// * `tolerance_secs` - Maximum allowed distance between `t` and `now`
///
/// # Returns
///
/// `true` if any v1 signature matches and the timestamp is within tolerance.
/// Malformed input fails closed.
pub fn verify_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    now: i64,
    tolerance_secs: u64,
) -> bool {
    if secret.is_empty() {
        warn!("signature_secret_empty");
        return false;
    }

    let parsed = match SignatureHeader::parse(header) {
        Some(p) => p,
        None => {
            warn!(header_length = header.len(), "signature_header_malformed");
            return false;
        }
    };

    let age = now.abs_diff(parsed.timestamp);
    if age > tolerance_secs {
        warn!(
            webhook_time = parsed.timestamp,
            current_time = now,
            age_seconds = age,
            tolerance_seconds = tolerance_secs,
            "signature_stale"
        );
        return false;
    }

    let expected = compute_signature(secret, &parsed.timestamp_raw, payload);

    let valid = parsed
        .v1_signatures
        .iter()
        .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())));

    if !valid {
        warn!(
            candidates = parsed.v1_signatures.len(),
            "signature_mismatch"
        );
    }

    valid
}

/// Compute `HMAC-SHA256(secret, "<timestamp>.<payload>")`.
pub fn compute_signature(secret: &str, timestamp: &str, payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Verifier bound to a signing secret and tolerance.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: SecretString,
    tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    /// Verify against the current system time.
    pub fn verify(&self, header: &str, payload: &[u8]) -> bool {
        self.verify_at(header, payload, unix_now())
    }

    /// Verify against an explicit `now`.
    pub fn verify_at(&self, header: &str, payload: &[u8], now: i64) -> bool {
        verify_signature(
            header,
            payload,
            self.secret.expose_secret(),
            now,
            self.tolerance.as_secs(),
        )
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Build a `Stripe-Signature` header value for `payload` at `timestamp`.
pub fn sign_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let timestamp = timestamp.to_string();
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(compute_signature(secret, &timestamp, payload))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_parse_header() {
        let parsed = SignatureHeader::parse("t=1700000000,v1=abcd,v0=0102").unwrap();
        assert_eq!(parsed.timestamp, 1_700_000_000);
        assert_eq!(parsed.timestamp_raw, "1700000000");
        assert_eq!(parsed.v1_signatures, vec![vec![0xab, 0xcd]]);
        assert_eq!(parsed.v0_signature, Some(vec![0x01, 0x02]));
    }

    #[test]
    fn test_parse_header_multiple_v1_and_unknown_keys() {
        let parsed = SignatureHeader::parse("t=1,v1=aa,v1=bb,v9=zz").unwrap();
        assert_eq!(parsed.v1_signatures.len(), 2);
    }

    #[test]
    fn test_parse_header_malformed() {
        assert!(SignatureHeader::parse("").is_none());
        assert!(SignatureHeader::parse("garbage").is_none());
        assert!(SignatureHeader::parse("t=123").is_none());
        assert!(SignatureHeader::parse("v1=abcd").is_none());
        assert!(SignatureHeader::parse("t=abc,v1=abcd").is_none());
        assert!(SignatureHeader::parse("t=123,v1=not-hex").is_none());
        assert!(SignatureHeader::parse("t=123v1=abcd").is_none());
    }

    #[test]
    fn test_verify_signature_valid() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_header(SECRET, NOW, body);
        assert!(verify_signature(&header, body, SECRET, NOW, 300));
    }

    #[test]
    fn test_verify_signature_wrong_secret() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_header("whsec_other", NOW, body);
        assert!(!verify_signature(&header, body, SECRET, NOW, 300));
    }

    #[test]
    fn test_verify_signature_tampered_body() {
        let header = sign_header(SECRET, NOW, br#"{"amount":100}"#);
        assert!(!verify_signature(&header, br#"{"amount":999}"#, SECRET, NOW, 300));
    }

    #[test]
    fn test_verify_signature_tolerance_boundary() {
        let body = b"{}";
        let header = sign_header(SECRET, NOW, body);
        assert!(verify_signature(&header, body, SECRET, NOW + 300, 300));
        assert!(verify_signature(&header, body, SECRET, NOW - 300, 300));
        assert!(!verify_signature(&header, body, SECRET, NOW + 301, 300));
        assert!(!verify_signature(&header, body, SECRET, NOW - 301, 300));
    }

    #[test]
    fn test_verify_signature_rotated_secret() {
        let body = b"{}";
        let stale = hex::encode(compute_signature("whsec_old", &NOW.to_string(), body));
        let fresh = hex::encode(compute_signature(SECRET, &NOW.to_string(), body));
        let header = format!("t={},v1={},v1={}", NOW, stale, fresh);
        assert!(verify_signature(&header, body, SECRET, NOW, 300));
    }

    #[test]
    fn test_verify_signature_v0_only_rejected() {
        let body = b"{}";
        let sig = hex::encode(compute_signature(SECRET, &NOW.to_string(), body));
        let header = format!("t={},v0={}", NOW, sig);
        assert!(!verify_signature(&header, body, SECRET, NOW, 300));
    }

    #[test]
    fn test_verify_signature_hashes_timestamp_as_sent() {
        let body = b"{}";
        for raw in ["+1700000000", "01700000000"] {
            let sig = hex::encode(compute_signature(SECRET, raw, body));
            let header = format!("t={},v1={}", raw, sig);
            assert!(verify_signature(&header, body, SECRET, NOW, 300), "{}", raw);

            // The canonical rendering is a different signed payload
            let canonical = hex::encode(compute_signature(SECRET, &NOW.to_string(), body));
            let header = format!("t={},v1={}", raw, canonical);
            assert!(!verify_signature(&header, body, SECRET, NOW, 300), "{}", raw);
        }
    }

    #[test]
    fn test_verify_signature_empty_secret() {
        let body = b"{}";
        let header = sign_header("", NOW, body);
        assert!(!verify_signature(&header, body, "", NOW, 300));
    }

    #[test]
    fn test_verifier_uses_injected_secret() {
        let verifier = SignatureVerifier::new(
            SecretString::new(SECRET.to_string()),
            Duration::from_secs(DEFAULT_TOLERANCE_SECS),
        );
        let body = b"{}";
        assert!(verifier.verify_at(&sign_header(SECRET, NOW, body), body, NOW));
        assert!(!format!("{:?}", verifier).contains(SECRET));
    }

    #[test]
    fn test_verifier_current_time() {
        let verifier = SignatureVerifier::new(
            SecretString::new(SECRET.to_string()),
            Duration::from_secs(DEFAULT_TOLERANCE_SECS),
        );
        let body = b"{}";
        assert!(verifier.verify(&sign_header(SECRET, unix_now(), body), body));
        assert!(!verifier.verify(&sign_header(SECRET, 946_684_800, body), body));
    }

    proptest! {
        #[test]
        fn prop_signed_payload_verifies_at_its_timestamp(
            timestamp in 0i64..4_000_000_000,
            body in proptest::collection::vec(any::<u8>(), 0..512),
            secret in "[a-zA-Z0-9_]{1,64}",
        ) {
            let header = sign_header(&secret, timestamp, &body);
            prop_assert!(verify_signature(&header, &body, &secret, timestamp, 300));
        }

        #[test]
        fn prop_outside_tolerance_never_verifies(
            timestamp in 0i64..4_000_000_000,
            skew in 301i64..1_000_000,
            future in any::<bool>(),
            body in proptest::collection::vec(any::<u8>(), 0..128),
        ) {
            let header = sign_header(SECRET, timestamp, &body);
            let now = if future { timestamp + skew } else { timestamp - skew };
            prop_assert!(!verify_signature(&header, &body, SECRET, now, 300));
        }

        #[test]
        fn prop_arbitrary_header_never_panics(header in ".{0,128}") {
            let _ = verify_signature(&header, b"{}", SECRET, NOW, 300);
        }
    }
}
