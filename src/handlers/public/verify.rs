use axum::{extract::State, http::HeaderMap};
use chrono::Utc;
use serde::Deserialize;

use crate::db::AppState;
use crate::engine::{self, Verification};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::util::{extract_bearer_token, extract_client_ip};

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub account_id: i64,
    /// Current account balance in cents, if the EA reports it
    #[serde(default)]
    pub balance_cents: Option<i64>,
}

/// POST /licenses/verify - runtime check from a running EA.
/// The license key travels as the bearer token. Failed checks say nothing
/// beyond the license's derived status.
pub async fn verify_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<Verification>> {
    let license_key = extract_bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    let client_ip = extract_client_ip(&headers);
    let conn = state.db.get()?;
    let now = Utc::now().timestamp();

    let verification = engine::verify_binding(
        &conn,
        license_key,
        request.account_id,
        request.balance_cents,
        client_ip.as_deref(),
        now,
    )?;

    if !verification.valid {
        tracing::debug!(
            account_id = request.account_id,
            status = ?verification.status,
            ip = ?client_ip,
            "License verification failed"
        );
    }

    Ok(Json(verification))
}
