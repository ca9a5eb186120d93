//! Signed request verification
//!
//! When Weibo hosts an app inside its own pages it hands the app a
//! `signed_request` of the form `base64url(signature).base64url(json)`.
//! The signature is HMAC-SHA256 over the *encoded* payload segment, keyed
//! with the app secret. A payload is only trusted once [`verify`] returns
//! [`Verification::Verified`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::constants::SIGNED_REQUEST_ALGORITHM;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Outcome of verifying a well-formed signed request.
///
/// Mismatches are expected, security-relevant outcomes rather than errors,
/// so they are variants here and callers must branch on them.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// Signature matched; the decoded payload can be trusted.
    Verified(Map<String, Value>),
    /// Declared algorithm is missing or not HMAC-SHA256.
    AlgorithmMismatch { algorithm: Option<String> },
    /// Signature does not match the payload under this secret.
    SignatureMismatch,
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified(_))
    }

    /// Convert into the trusted payload, turning mismatches into errors.
    pub fn into_payload(self) -> Result<Map<String, Value>> {
        match self {
            Verification::Verified(payload) => Ok(payload),
            Verification::AlgorithmMismatch { algorithm } => {
                Err(Error::AlgorithmMismatch { algorithm })
            }
            Verification::SignatureMismatch => Err(Error::SignatureMismatch),
        }
    }
}

/// A signed request split and decoded, but not yet verified.
#[derive(Debug, Clone)]
pub struct SignedPayload<'a> {
    /// `algorithm` field as declared by the sender
    pub algorithm: Option<String>,
    /// Decoded signature bytes
    pub signature: Vec<u8>,
    /// Decoded JSON payload
    pub payload: Map<String, Value>,
    /// Payload segment exactly as transmitted; this is what gets signed
    encoded_payload: &'a str,
}

impl<'a> SignedPayload<'a> {
    /// Split and decode a signed request without checking the signature.
    pub fn decode(signed_request: &'a str) -> Result<Self> {
        let mut segments = signed_request.split('.');
        let (Some(encoded_sig), Some(encoded_payload), None) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(Error::MalformedInput(
                "expected exactly two '.'-separated segments".into(),
            ));
        };

        let signature = decode_segment(encoded_sig)
            .map_err(|e| Error::MalformedInput(format!("signature segment: {e}")))?;
        let payload_bytes = decode_segment(encoded_payload)
            .map_err(|e| Error::MalformedInput(format!("payload segment: {e}")))?;

        let payload = match serde_json::from_slice::<Value>(&payload_bytes) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(Error::MalformedInput(
                    "payload is not a JSON object".into(),
                ));
            }
            Err(e) => return Err(Error::MalformedInput(format!("payload JSON: {e}"))),
        };

        let algorithm = payload
            .get("algorithm")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            algorithm,
            signature,
            payload,
            encoded_payload,
        })
    }

    /// Check algorithm and signature against the app secret.
    ///
    /// The algorithm check runs first: a payload declaring anything other
    /// than HMAC-SHA256 is rejected even if the signature would match.
    pub fn verify(self, secret: &[u8]) -> Verification {
        let supported = self
            .algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(SIGNED_REQUEST_ALGORITHM));
        if !supported {
            warn!(algorithm = ?self.algorithm, "signed request uses unsupported algorithm");
            return Verification::AlgorithmMismatch {
                algorithm: self.algorithm,
            };
        }

        // HMAC accepts keys of any length
        let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
            return Verification::SignatureMismatch;
        };
        mac.update(self.encoded_payload.as_bytes());
        let expected = mac.finalize().into_bytes();

        if bool::from(expected.as_slice().ct_eq(&self.signature)) {
            debug!("signed request verified");
            Verification::Verified(self.payload)
        } else {
            warn!("signed request signature mismatch");
            Verification::SignatureMismatch
        }
    }
}

/// Decode and verify a signed request with the app secret.
///
/// Returns `Err(MalformedInput)` when the string cannot be decoded at all;
/// otherwise one of the three [`Verification`] outcomes.
pub fn verify(signed_request: &str, secret: &[u8]) -> Result<Verification> {
    Ok(SignedPayload::decode(signed_request)?.verify(secret))
}

/// Decode one URL-safe base64 segment that may or may not carry padding.
///
/// Maps the URL-safe alphabet back to the standard one and pads to a
/// multiple of four before a standard decode.
pub fn decode_segment(segment: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let mut normalized: String = segment
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }
    STANDARD.decode(normalized)
}
