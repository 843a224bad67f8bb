//! Download grants: short-lived signed handles that exchange an active
//! license for its EA build.
//!
//! Grants are EdDSA JWTs. They are stateless; there is no revocation list, but
//! the exchange re-checks the license so a revoked license cannot download.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::SigningKey;
use jwt_simple::prelude::*;
use rand::rngs::OsRng;
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::queries;
use crate::engine::load_license;
use crate::error::{AppError, Result};
use crate::models::{Caller, License, LicenseStatus, Product};

/// Lifetime of a download grant.
pub const GRANT_TTL_SECS: u64 = 3600;

const GRANT_ISSUER: &str = "ea-licensing";
const DOWNLOAD_PURPOSE: &str = "download";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantClaims {
    pub license_id: String,
    pub product_id: String,
    /// Grants are single-purpose; only "download" is issued
    pub purpose: String,
}

/// What the customer gets back: a token and the URL that redeems it.
#[derive(Debug, Clone, Serialize)]
pub struct GrantHandle {
    pub token: String,
    pub expires_at: i64,
    pub exchange_url: String,
}

/// Holds the server's Ed25519 grant key.
pub struct GrantSigner {
    key_pair: Ed25519KeyPair,
    public_key: Ed25519PublicKey,
}

impl GrantSigner {
    /// Fresh random key. Grants die with the process.
    pub fn generate() -> Result<Self> {
        Self::from_signing_key(&SigningKey::generate(&mut OsRng))
    }

    /// Load from a base64-encoded 32-byte Ed25519 secret.
    pub fn from_base64(secret_b64: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(secret_b64.trim())
            .map_err(|e| AppError::Internal(format!("Invalid grant key encoding: {}", e)))?;
        let key_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::Internal("Grant key must be 32 bytes".into()))?;
        Self::from_signing_key(&SigningKey::from_bytes(&key_bytes))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Result<Self> {
        let key_pair = Ed25519KeyPair::from_bytes(&signing_key.to_keypair_bytes())
            .map_err(|e| AppError::Internal(format!("Failed to create key pair: {}", e)))?;
        let public_key = key_pair.public_key();
        Ok(Self {
            key_pair,
            public_key,
        })
    }

    /// Base64 public key, for anyone verifying grants out of process.
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.public_key.to_bytes())
    }

    /// Sign grant claims. Returns the token and its expiry (Unix seconds).
    pub fn sign(&self, claims: GrantClaims, jti: &str) -> Result<(String, i64)> {
        let subject = claims.license_id.clone();
        let jwt_claims = Claims::with_custom_claims(claims, Duration::from_secs(GRANT_TTL_SECS))
            .with_issuer(GRANT_ISSUER)
            .with_subject(subject)
            .with_jwt_id(jti);
        let expires_at = jwt_claims
            .expires_at
            .map(|t| t.as_secs() as i64)
            .ok_or_else(|| AppError::Internal("Grant has no expiry".into()))?;

        let token = self
            .key_pair
            .sign(jwt_claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign grant: {}", e)))?;

        Ok((token, expires_at))
    }

    /// Check signature, expiry, issuer and purpose.
    pub fn verify(&self, token: &str) -> Result<JWTClaims<GrantClaims>> {
        let claims = self
            .public_key
            .verify_token::<GrantClaims>(token, None)
            .map_err(|e| {
                tracing::debug!("Grant rejected: {}", e);
                AppError::Unauthorized
            })?;

        if claims.issuer.as_deref() != Some(GRANT_ISSUER) || claims.custom.purpose != DOWNLOAD_PURPOSE {
            return Err(AppError::Unauthorized);
        }

        Ok(claims)
    }
}

/// Issue a one-hour download grant for a license that is active right now.
pub fn issue_download_grant(
    conn: &Connection,
    caller: &Caller,
    signer: &GrantSigner,
    base_url: &str,
    license_id: &str,
    now: i64,
) -> Result<GrantHandle> {
    let license = load_license(conn, caller, license_id)?;
    let status = license.effective_status(now);
    if status != LicenseStatus::Active {
        return Err(AppError::LicenseNotActive { status });
    }

    let jti = Uuid::new_v4().to_string();
    let (token, expires_at) = signer.sign(
        GrantClaims {
            license_id: license.id.clone(),
            product_id: license.product_id.clone(),
            purpose: DOWNLOAD_PURPOSE.to_string(),
        },
        &jti,
    )?;

    let exchange_url = format!(
        "{}/download?grant={}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(&token)
    );

    tracing::info!(license_id, jti = %jti, expires_at, "Download grant issued");

    Ok(GrantHandle {
        token,
        expires_at,
        exchange_url,
    })
}

/// Redeem a grant: the token must verify and its license must still be
/// active. Returns the license and the product whose build to serve.
pub fn redeem_download_grant(
    conn: &Connection,
    signer: &GrantSigner,
    token: &str,
    now: i64,
) -> Result<(License, Product)> {
    let claims = signer.verify(token)?;

    let license = queries::get_license_by_id(conn, &claims.custom.license_id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;
    let status = license.effective_status(now);
    if status != LicenseStatus::Active {
        return Err(AppError::LicenseNotActive { status });
    }

    let product = queries::get_product_by_id(conn, &claims.custom.product_id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    Ok((license, product))
}
