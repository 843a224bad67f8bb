//! Provisioning gateway: turns normalized payment events into licenses.
//!
//! Checkout providers are outside this crate. Whatever receives their
//! webhooks hands over a [`PaymentConfirmation`] or a [`PaymentRefund`]; the
//! payment id is the idempotency key, so provider retries are harmless.

use rusqlite::Connection;

use crate::db::AppState;
use crate::engine::{self, LicenseRequest, ProvisionOutcome};
use crate::error::{AppError, Result};
use crate::models::*;

const DEFAULT_REFUND_REASON: &str = "payment refunded";

pub fn validate_confirmation(confirmation: &PaymentConfirmation) -> Result<()> {
    if confirmation.payment_id.trim().is_empty() {
        return Err(AppError::validation("payment_id", "must not be empty"));
    }
    if confirmation.buyer_id.trim().is_empty() {
        return Err(AppError::validation("buyer_id", "must not be empty"));
    }
    if confirmation.product_id.trim().is_empty() {
        return Err(AppError::validation("product_id", "must not be empty"));
    }
    if confirmation.amount_cents < 0 {
        return Err(AppError::validation("amount_cents", "must not be negative"));
    }
    let currency = confirmation.currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::validation(
            "currency",
            "must be a 3-letter currency code",
        ));
    }
    Ok(())
}

/// Create or renew the buyer's license for a confirmed payment.
///
/// The product decides tier and term. Engine errors come back unchanged so
/// the sender can decide whether to retry.
pub fn provision(
    conn: &mut Connection,
    confirmation: &PaymentConfirmation,
    now: i64,
) -> Result<ProvisionOutcome> {
    validate_confirmation(confirmation)?;

    let request = LicenseRequest {
        owner_id: confirmation.buyer_id.trim().to_string(),
        product_id: confirmation.product_id.trim().to_string(),
        tier_id: None,
        duration_months: None,
    };
    let payment = PaymentDetails {
        amount_cents: Some(confirmation.amount_cents),
        currency: Some(confirmation.currency.trim().to_uppercase()),
        promo_code: confirmation
            .promo_code
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from),
    };

    engine::create_or_renew_license(
        conn,
        &Caller::System,
        confirmation.payment_id.trim(),
        &request,
        &payment,
        now,
    )
}

/// [`provision`], then announce the license. Replays announce nothing.
pub async fn provision_and_notify(
    state: &AppState,
    confirmation: &PaymentConfirmation,
    now: i64,
) -> Result<ProvisionOutcome> {
    let outcome = {
        let mut conn = state.db.get()?;
        provision(&mut conn, confirmation, now)?
    };

    if outcome.action != ProvisionAction::Replayed {
        state
            .notifier
            .license_ready(&outcome.license, outcome.action)
            .await;
    }

    Ok(outcome)
}

/// Revoke the license a refunded payment provisioned. Unknown payments are
/// not an error: there is nothing to take back.
pub fn refund(conn: &mut Connection, refund: &PaymentRefund, now: i64) -> Result<Option<License>> {
    if refund.payment_id.trim().is_empty() {
        return Err(AppError::validation("payment_id", "must not be empty"));
    }
    let reason = refund
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REFUND_REASON);

    let revoked = engine::revoke_for_payment(conn, &Caller::System, refund.payment_id.trim(), reason, now)?;
    if revoked.is_none() {
        tracing::warn!(payment_id = %refund.payment_id, "Refund for a payment that provisioned nothing");
    }
    Ok(revoked)
}
