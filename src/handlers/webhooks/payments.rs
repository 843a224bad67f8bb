use axum::{body::Bytes, extract::State, http::HeaderMap};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::crypto::verify_signature;
use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{PaymentConfirmation, PaymentRefund, ProvisionAction};
use crate::provisioning;

pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Normalized payment events, as delivered by the storefront.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    #[serde(rename = "payment.succeeded")]
    Succeeded(PaymentConfirmation),
    #[serde(rename = "payment.refunded")]
    Refunded(PaymentRefund),
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ProvisionAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,
}

/// POST /webhooks/payments
///
/// Authenticated by an HMAC-SHA256 of the raw body. Engine errors keep their
/// status codes so the sender knows whether a retry can help.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let Some(secret) = state.payment_webhook_secret.as_deref() else {
        tracing::warn!("Payment webhook received but PAYMENT_WEBHOOK_SECRET is not set");
        return Err(AppError::Unauthorized);
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    if !verify_signature(secret, &body, signature)? {
        tracing::warn!("Payment webhook rejected: invalid signature");
        return Err(AppError::Unauthorized);
    }

    let event: PaymentEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid payment event: {}", e)))?;
    let now = Utc::now().timestamp();

    match event {
        PaymentEvent::Succeeded(confirmation) => {
            let outcome = provisioning::provision_and_notify(&state, &confirmation, now).await?;
            Ok(Json(WebhookResponse {
                status: "ok",
                action: Some(outcome.action),
                license_id: Some(outcome.license.id),
            }))
        }
        PaymentEvent::Refunded(refund) => {
            let mut conn = state.db.get()?;
            let revoked = provisioning::refund(&mut conn, &refund, now)?;
            Ok(Json(WebhookResponse {
                status: if revoked.is_some() { "revoked" } else { "ignored" },
                action: None,
                license_id: revoked.map(|l| l.id),
            }))
        }
    }
}
