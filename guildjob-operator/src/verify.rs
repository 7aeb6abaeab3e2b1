//! Ed25519 verification of inbound interaction requests
//!
//! Discord signs `timestamp || body` with the application key and sends the
//! signature hex-encoded alongside the timestamp.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

/// Header carrying the hex-encoded signature
pub const SIGNATURE_HEADER: &str = "X-Signature-Ed25519";

/// Header carrying the signed timestamp
pub const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("malformed public key: {0}")]
    MalformedPublicKey(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),
}

/// Signature-related header values of one request
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureHeaders<'a> {
    pub signature: Option<&'a str>,
    /// Raw timestamp bytes; never parsed
    pub timestamp: &'a [u8],
}

#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey,
}

impl SignatureVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Build from the hex-encoded application public key
    pub fn from_hex(public_key: &str) -> Result<Self, VerifyError> {
        let bytes = hex::decode(public_key.trim())
            .map_err(|e| VerifyError::MalformedPublicKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VerifyError::MalformedPublicKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| VerifyError::MalformedPublicKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Check a request's signature.
    ///
    /// `Ok(false)` means unsigned or signed by someone else; `Err` means the
    /// signature header could not be decoded at all.
    pub fn verify(&self, headers: SignatureHeaders<'_>, body: &[u8]) -> Result<bool, VerifyError> {
        let Some(encoded) = headers.signature else {
            return Ok(false);
        };

        let raw = hex::decode(encoded).map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;
        let signature = Signature::from_slice(&raw)
            .map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;

        let mut message = Vec::with_capacity(headers.timestamp.len() + body.len());
        message.extend_from_slice(headers.timestamp);
        message.extend_from_slice(body);

        Ok(self.key.verify(&message, &signature).is_ok())
    }
}
