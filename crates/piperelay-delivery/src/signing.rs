//! Timestamped HMAC-SHA256 payload signatures.
//!
//! Receivers verify `X-PipeRelay-Signature` by recomputing
//! `HMAC-SHA256(secret, "<timestamp>.<payload>")` over the raw payload
//! bytes. The timestamp is part of the signed message, so replay-window
//! enforcement on the receiving side is well-defined. The `v1=` prefix
//! leaves room for future algorithm migration.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature scheme version prefix.
pub const SIGNATURE_VERSION: &str = "v1";

/// A signature together with the timestamp it binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    /// `v1=<lowercase hex>` header value.
    pub signature: String,
    /// Unix seconds at signing time.
    pub timestamp: i64,
}

/// Signs a payload with the current wall-clock timestamp.
pub fn sign(secret: &str, payload: &[u8]) -> SignedPayload {
    let timestamp = Utc::now().timestamp();
    SignedPayload { signature: signature(secret, payload, timestamp), timestamp }
}

/// Deterministic signature for a fixed timestamp.
///
/// The signed message is `decimal(timestamp) || "." || payload`; the
/// dot is a literal ASCII `0x2E` and the payload bytes are used verbatim.
pub fn signature(secret: &str, payload: &[u8], timestamp: i64) -> String {
    // HMAC-SHA256 accepts keys of any length, so construction cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    format!("{SIGNATURE_VERSION}={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a signature against a payload and timestamp.
///
/// Recomputes the expected value and compares with constant-time byte
/// equality to avoid leaking the expected signature through timing.
pub fn verify(secret: &str, payload: &[u8], timestamp: i64, candidate: &str) -> bool {
    let expected = signature(secret, payload, timestamp);
    timing_safe_eq(expected.as_bytes(), candidate.as_bytes())
}

fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (a_byte, b_byte) in a.iter().zip(b.iter()) {
        diff |= a_byte ^ b_byte;
    }

    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let signed = sign("whsec_test", b"{\"id\":\"1\"}");
        assert!(verify("whsec_test", b"{\"id\":\"1\"}", signed.timestamp, &signed.signature));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let signed = sign("whsec_right", b"payload");
        assert!(!verify("whsec_wrong", b"payload", signed.timestamp, &signed.signature));
    }

    #[test]
    fn shifted_timestamp_fails_verification() {
        let signed = sign("whsec_test", b"payload");
        assert!(!verify("whsec_test", b"payload", signed.timestamp + 1, &signed.signature));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let signed = sign("whsec_test", b"payload");
        assert!(!verify("whsec_test", b"payload!", signed.timestamp, &signed.signature));
    }

    #[test]
    fn signature_is_byte_stable() {
        let first = signature("secret", b"abc", 1_700_000_000);
        let second = signature("secret", b"abc", 1_700_000_000);
        assert_eq!(first, second);
    }

    #[test]
    fn signature_has_versioned_hex_format() {
        let sig = signature("secret", b"abc", 1_700_000_000);
        let hex_part = sig.strip_prefix("v1=").expect("v1 prefix");
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn signed_message_concatenates_timestamp_dot_payload() {
        // Recompute by hand over the concatenated message to pin the
        // wire format: decimal timestamp, literal dot, raw payload.
        let timestamp = 1_700_000_000_i64;
        let payload = b"{\"a\":1}";
        let mut message = timestamp.to_string().into_bytes();
        message.push(b'.');
        message.extend_from_slice(payload);

        let mut mac = HmacSha256::new_from_slice(b"secret").expect("any key length");
        mac.update(&message);
        let expected = format!("v1={}", hex::encode(mac.finalize().into_bytes()));

        assert_eq!(signature("secret", payload, timestamp), expected);
    }

    #[test]
    fn timing_safe_eq_handles_length_mismatch() {
        assert!(timing_safe_eq(b"same", b"same"));
        assert!(!timing_safe_eq(b"same", b"different"));
        assert!(!timing_safe_eq(b"same", b"sam"));
    }
}
