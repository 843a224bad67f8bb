use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Hash a secret (API key) for storage and lookup.
pub fn hash_secret(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"ea-licensing-v1:");
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute the `sha256=<hex>` signature header value for a payload.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verify an `X-Signature` header against the raw request body.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> Result<bool> {
    let expected = sign_payload(secret, payload)?;
    let expected_bytes = expected.as_bytes();
    let provided_bytes = signature.trim().as_bytes();

    // Signature length is not secret
    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}
