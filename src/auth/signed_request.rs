//! Signed-request envelopes.
//!
//! # Format
//! ```text
//! <base64(hmac_sha256(secret, payload))>.<base64(json)>
//! ```
//! The HMAC is computed over the payload exactly as transmitted (the base64
//! text, not the decoded JSON).
//!
//! # Design Decisions
//! - Pure functions, no I/O
//! - Signatures are compared in constant time
//! - Payload decoding accepts both base64 alphabets, padded or not

use base64::{
    alphabet,
    engine::{general_purpose::STANDARD, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Errors produced while taking an envelope apart.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("No signed request found")]
    Empty,
    #[error("Incorrectly formatted signed request")]
    Malformed,
    #[error("signed request payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("signed request payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("signed request payload has no {0}")]
    MissingField(&'static str),
}

/// The two halves of a signed request, borrowed from the header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedEnvelope<'a> {
    pub signature: &'a str,
    pub payload: &'a str,
}

/// Split `signature.payload`; anything other than exactly two non-empty parts fails.
pub fn parse(raw: &str) -> Result<SignedEnvelope<'_>, EnvelopeError> {
    if raw.is_empty() {
        return Err(EnvelopeError::Empty);
    }
    let mut parts = raw.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(signature), Some(payload), None) if !signature.is_empty() && !payload.is_empty() => {
            Ok(SignedEnvelope { signature, payload })
        }
        _ => Err(EnvelopeError::Malformed),
    }
}

/// Base64 HMAC-SHA256 of `payload` under `secret`.
pub fn sign(secret: &[u8], payload: &str) -> String {
    let mut mac = keyed(secret);
    mac.update(payload.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Check `signature` against the HMAC of `payload`, in constant time.
pub fn verify(signature: &str, secret: &[u8], payload: &str) -> bool {
    let expected = sign(secret, payload);
    // Length is public (fixed for SHA-256), only the contents are compared in constant time.
    expected.len() == signature.len() && bool::from(expected.as_bytes().ct_eq(signature.as_bytes()))
}

/// Decode a base64 JSON payload into `T`.
pub fn decode_payload<T: DeserializeOwned>(payload: &str) -> Result<T, EnvelopeError> {
    let engine = if payload.contains(['-', '_']) {
        &URL_SAFE_LENIENT
    } else {
        &STANDARD_LENIENT
    };
    let bytes = engine.decode(payload)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Build the full `Authorization` header value for `payload` (already JSON-encoded).
pub fn authorization_header(secret: &[u8], payload_json: &str) -> String {
    let payload = STANDARD.encode(payload_json.as_bytes());
    format!("SIGNED_REQUEST {}.{}", sign(secret, &payload), payload)
}

fn keyed(secret: &[u8]) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    const SECRET: &[u8] = b"consumer-secret";

    #[test]
    fn parse_requires_exactly_two_parts() {
        let env = parse("abc.def").unwrap();
        assert_eq!(env.signature, "abc");
        assert_eq!(env.payload, "def");

        assert!(matches!(parse(""), Err(EnvelopeError::Empty)));
        assert!(matches!(parse("abc"), Err(EnvelopeError::Malformed)));
        assert!(matches!(parse("a.b.c"), Err(EnvelopeError::Malformed)));
        assert!(matches!(parse(".b"), Err(EnvelopeError::Malformed)));
    }

    #[test]
    fn verify_accepts_own_signature() {
        let payload = STANDARD.encode(br#"{"context":{}}"#);
        let sig = sign(SECRET, &payload);
        assert!(verify(&sig, SECRET, &payload));
        assert!(!verify(&sig, b"other-secret", &payload));
        assert!(!verify("short", SECRET, &payload));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let payload = STANDARD.encode(br#"{"user":"alice"}"#);
        let sig = sign(SECRET, &payload);

        let mut tampered = payload.clone().into_bytes();
        tampered[0] ^= 0x01;
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(!verify(&sig, SECRET, &tampered));
    }

    #[test]
    fn decode_payload_handles_both_alphabets() {
        let json = r#"{"a":"??>>"}"#;
        let standard = STANDARD.encode(json);
        let url_safe = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json);

        let a: Value = decode_payload(&standard).unwrap();
        let b: Value = decode_payload(&url_safe).unwrap();
        assert_eq!(a, b);
        assert_eq!(a["a"], "??>>");
    }

    #[test]
    fn decode_payload_rejects_garbage() {
        assert!(matches!(decode_payload::<Value>("!!!"), Err(EnvelopeError::Base64(_))));
        let not_json = STANDARD.encode("not json");
        assert!(matches!(decode_payload::<Value>(&not_json), Err(EnvelopeError::Json(_))));
    }

    #[test]
    fn authorization_header_round_trips() {
        let header = authorization_header(SECRET, r#"{"x":1}"#);
        let rest = header.strip_prefix("SIGNED_REQUEST ").unwrap();
        let env = parse(rest).unwrap();
        assert!(verify(env.signature, SECRET, env.payload));
        let v: Value = decode_payload(env.payload).unwrap();
        assert_eq!(v["x"], 1);
    }
}
