use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{load_license, require_privileged};
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::*;
use crate::util::add_months;

/// What to issue or renew for an owner.
#[derive(Debug, Clone, Deserialize)]
pub struct LicenseRequest {
    pub owner_id: String,
    pub product_id: String,
    /// Overrides the product's default tier
    #[serde(default)]
    pub tier_id: Option<String>,
    /// Omitted: use the product's term (which may be perpetual)
    #[serde(default)]
    pub duration_months: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionOutcome {
    pub license: License,
    pub action: ProvisionAction,
}

fn validate_duration(duration_months: Option<u32>) -> Result<()> {
    if duration_months == Some(0) {
        return Err(AppError::validation(
            "duration_months",
            "must be greater than zero",
        ));
    }
    Ok(())
}

fn resolve_tier(conn: &Connection, tier_id: Option<&str>) -> Result<Option<Tier>> {
    match tier_id {
        Some(id) => queries::get_tier_by_id(conn, id)?
            .map(Some)
            .ok_or_else(|| AppError::validation("tier_id", format!("unknown tier {}", id))),
        None => Ok(None),
    }
}

fn get_product(conn: &Connection, product_id: &str) -> Result<Product> {
    queries::get_product_by_id(conn, product_id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))
}

/// Issue, or renew, the license an idempotency key pays for.
///
/// Renews the owner's most recent non-revoked license for the product if
/// there is one, otherwise creates a license. The key lookup, the license
/// write and the ledger insert share one IMMEDIATE transaction, so a repeated
/// key (sequential or concurrent) returns the first result with action
/// `Replayed` and changes nothing.
pub fn create_or_renew_license(
    conn: &mut Connection,
    caller: &Caller,
    idempotency_key: &str,
    request: &LicenseRequest,
    payment: &PaymentDetails,
    now: i64,
) -> Result<ProvisionOutcome> {
    require_privileged(caller, "issue licenses")?;
    if idempotency_key.trim().is_empty() {
        return Err(AppError::validation("idempotency_key", "must not be empty"));
    }
    if request.owner_id.trim().is_empty() {
        return Err(AppError::validation("owner_id", "must not be empty"));
    }
    validate_duration(request.duration_months)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(record) = queries::get_provisioning_record(&tx, idempotency_key)? {
        let license = queries::get_license_by_id(&tx, &record.license_id)?
            .ok_or_else(|| AppError::Internal("Provisioned license is missing".into()))?;
        tracing::info!(
            idempotency_key,
            license_id = %license.id,
            "Provisioning replayed, returning original license"
        );
        return Ok(ProvisionOutcome {
            license,
            action: ProvisionAction::Replayed,
        });
    }

    let product = get_product(&tx, &request.product_id)?;
    let tier = resolve_tier(&tx, request.tier_id.as_deref().or(product.tier_id.as_deref()))?;
    let duration_months = request.duration_months.or(product.term_months);

    let (license, action) = match queries::find_renewable_license(&tx, &request.owner_id, &product.id)? {
        Some(existing) => {
            let renewed = apply_renewal(&tx, caller, &existing, tier.as_ref(), duration_months, now)?;
            (renewed, ProvisionAction::Renewed)
        }
        None => {
            let created = create_license(
                &tx,
                caller,
                &request.owner_id,
                &product,
                tier.as_ref(),
                duration_months,
                now,
            )?;
            (created, ProvisionAction::Created)
        }
    };

    queries::insert_provisioning_record(&tx, idempotency_key, &license.id, action, payment, now)?;
    tx.commit()?;

    tracing::info!(
        idempotency_key,
        license_id = %license.id,
        owner_id = %license.owner_id,
        action = action.as_ref(),
        "License provisioned"
    );

    Ok(ProvisionOutcome { license, action })
}

/// Insert a new active license. Capacity comes from the tier, or from the
/// product when there is no tier. `duration_months` None means perpetual.
pub fn create_license(
    conn: &Connection,
    caller: &Caller,
    owner_id: &str,
    product: &Product,
    tier: Option<&Tier>,
    duration_months: Option<u32>,
    now: i64,
) -> Result<License> {
    require_privileged(caller, "issue licenses")?;
    validate_duration(duration_months)?;

    let expires_at = duration_months
        .map(|months| add_months(now, months))
        .transpose()?;
    let capacity = tier
        .map(|t| t.default_capacity)
        .unwrap_or(product.default_capacity);

    let license = queries::create_license(
        conn,
        &NewLicense {
            owner_id: owner_id.to_string(),
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            tier_id: tier.map(|t| t.id.clone()),
            expires_at,
            capacity,
        },
        now,
    )?;

    queries::record_license_event(
        conn,
        &license.id,
        LicenseAction::Created,
        caller,
        Some(&json!({
            "product_id": product.id,
            "tier_id": license.tier_id,
            "expires_at": expires_at,
            "max_allowed_bindings": capacity.as_column(),
        })),
        now,
    )?;

    tracing::info!(license_id = %license.id, owner_id, product_id = %product.id, "License created");
    Ok(license)
}

/// Renew a license by id. A tier id switches the license to that tier and
/// its default capacity; an omitted duration uses the product's term.
pub fn renew_license(
    conn: &mut Connection,
    caller: &Caller,
    license_id: &str,
    tier_id: Option<&str>,
    duration_months: Option<u32>,
    now: i64,
) -> Result<License> {
    require_privileged(caller, "renew licenses")?;
    validate_duration(duration_months)?;

    let license = load_license(conn, caller, license_id)?;
    let tier = resolve_tier(conn, tier_id)?;
    let duration_months = match duration_months {
        Some(months) => Some(months),
        None => get_product(conn, &license.product_id)?.term_months,
    };

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let renewed = apply_renewal(&tx, caller, &license, tier.as_ref(), duration_months, now)?;
    tx.commit()?;
    Ok(renewed)
}

/// New expiry = max(current expiry, now) + duration, so a renewal never
/// shortens a license. No duration makes it perpetual; a perpetual license
/// stays perpetual.
///
/// Moving to a tier with fewer slots deactivates the most recently bound
/// accounts until the active count fits. Callers hold an IMMEDIATE
/// transaction, so no bind can slip in between the count and the release.
fn apply_renewal(
    conn: &Connection,
    caller: &Caller,
    license: &License,
    tier: Option<&Tier>,
    duration_months: Option<u32>,
    now: i64,
) -> Result<License> {
    if license.status == LicenseStatus::Revoked {
        return Err(AppError::LicenseNotActive {
            status: LicenseStatus::Revoked,
        });
    }

    let new_expires_at = match (license.expires_at, duration_months) {
        (Some(current), Some(months)) => Some(add_months(current.max(now), months)?),
        _ => None,
    };

    let mut changes = LicenseChanges {
        expires_at: Some(new_expires_at),
        ..Default::default()
    };
    // Suspension is an administrative hold; paying does not lift it
    if license.status == LicenseStatus::Expired {
        changes.status = Some(LicenseStatus::Active);
    }
    if let Some(tier) = tier
        && license.tier_id.as_deref() != Some(tier.id.as_str())
    {
        changes.tier_id = Some(Some(tier.id.clone()));
        changes.capacity = Some(tier.default_capacity);
    }

    let renewed = queries::update_license(conn, license, &changes, now)?;

    // A smaller tier keeps the oldest bindings and releases the rest
    let mut released = Vec::new();
    if let Capacity::Limited(limit) = renewed.capacity {
        let active = queries::count_active_bindings(conn, &license.id)?;
        if active > limit {
            released = queries::deactivate_newest_bindings(conn, &license.id, active - limit, now)?;
            tracing::warn!(
                license_id = %license.id,
                limit,
                released = ?released,
                "Renewal lowered capacity, released newest bindings"
            );
        }
    }

    queries::record_license_event(
        conn,
        &license.id,
        LicenseAction::Renewed,
        caller,
        Some(&json!({
            "previous_expires_at": license.expires_at,
            "expires_at": renewed.expires_at,
            "tier_id": renewed.tier_id,
            "duration_months": duration_months,
            "released_accounts": released,
        })),
        now,
    )?;

    tracing::info!(
        license_id = %license.id,
        expires_at = ?renewed.expires_at,
        "License renewed"
    );
    Ok(renewed)
}

/// Move a license's expiry to `new_expires_at`, which must be in the future.
///
/// A persisted `expired` status flips back to active. Suspended licenses take
/// the new date and stay suspended; revoked licenses are refused.
pub fn extend_expiry(
    conn: &mut Connection,
    caller: &Caller,
    license_id: &str,
    new_expires_at: i64,
    now: i64,
) -> Result<License> {
    require_privileged(caller, "extend licenses")?;
    let license = load_license(conn, caller, license_id)?;

    if new_expires_at <= now {
        return Err(AppError::validation("expires_at", "must be in the future"));
    }
    if license.status == LicenseStatus::Revoked {
        return Err(AppError::LicenseNotActive {
            status: LicenseStatus::Revoked,
        });
    }

    let mut changes = LicenseChanges {
        expires_at: Some(Some(new_expires_at)),
        ..Default::default()
    };
    if license.status == LicenseStatus::Expired {
        changes.status = Some(LicenseStatus::Active);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let extended = queries::update_license(&tx, &license, &changes, now)?;
    queries::record_license_event(
        &tx,
        &license.id,
        LicenseAction::Extended,
        caller,
        Some(&json!({
            "previous_expires_at": license.expires_at,
            "expires_at": new_expires_at,
        })),
        now,
    )?;
    tx.commit()?;

    tracing::info!(license_id, expires_at = new_expires_at, "License expiry extended");
    Ok(extended)
}

/// Revoke a license. Terminal: bindings stay in place but read as inactive.
/// Revoking twice is a no-op.
pub fn revoke_license(
    conn: &mut Connection,
    caller: &Caller,
    license_id: &str,
    reason: &str,
    now: i64,
) -> Result<License> {
    require_privileged(caller, "revoke licenses")?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::validation("reason", "must not be empty"));
    }

    let license = load_license(conn, caller, license_id)?;
    if license.status == LicenseStatus::Revoked {
        return Ok(license);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let revoked = queries::update_license(
        &tx,
        &license,
        &LicenseChanges {
            status: Some(LicenseStatus::Revoked),
            revoked: Some((now, reason.to_string())),
            ..Default::default()
        },
        now,
    )?;
    queries::record_license_event(
        &tx,
        &license.id,
        LicenseAction::Revoked,
        caller,
        Some(&json!({ "reason": reason })),
        now,
    )?;
    tx.commit()?;

    tracing::info!(license_id, reason, "License revoked");
    Ok(revoked)
}

/// Put a license on administrative hold. Suspending twice is a no-op.
pub fn suspend_license(
    conn: &mut Connection,
    caller: &Caller,
    license_id: &str,
    reason: Option<&str>,
    now: i64,
) -> Result<License> {
    require_privileged(caller, "suspend licenses")?;
    let license = load_license(conn, caller, license_id)?;

    match license.status {
        LicenseStatus::Revoked => {
            return Err(AppError::LicenseNotActive {
                status: LicenseStatus::Revoked,
            });
        }
        LicenseStatus::Suspended => return Ok(license),
        LicenseStatus::Active | LicenseStatus::Expired => {}
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let suspended = queries::update_license(
        &tx,
        &license,
        &LicenseChanges {
            status: Some(LicenseStatus::Suspended),
            ..Default::default()
        },
        now,
    )?;
    queries::record_license_event(
        &tx,
        &license.id,
        LicenseAction::Suspended,
        caller,
        reason.map(|r| json!({ "reason": r })).as_ref(),
        now,
    )?;
    tx.commit()?;

    tracing::info!(license_id, "License suspended");
    Ok(suspended)
}

/// Lift a suspension. The license goes back to active; if its date has
/// passed meanwhile it reads as expired.
pub fn reinstate_license(
    conn: &mut Connection,
    caller: &Caller,
    license_id: &str,
    now: i64,
) -> Result<License> {
    require_privileged(caller, "reinstate licenses")?;
    let license = load_license(conn, caller, license_id)?;

    match license.status {
        LicenseStatus::Suspended => {}
        LicenseStatus::Revoked => {
            return Err(AppError::LicenseNotActive {
                status: LicenseStatus::Revoked,
            });
        }
        LicenseStatus::Active | LicenseStatus::Expired => {
            return Err(AppError::validation("status", "license is not suspended"));
        }
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let reinstated = queries::update_license(
        &tx,
        &license,
        &LicenseChanges {
            status: Some(LicenseStatus::Active),
            ..Default::default()
        },
        now,
    )?;
    queries::record_license_event(&tx, &license.id, LicenseAction::Reinstated, caller, None, now)?;
    tx.commit()?;

    tracing::info!(license_id, "License reinstated");
    Ok(reinstated)
}

/// Revoke whatever license a payment provisioned (refunds, chargebacks).
/// Returns None when the payment never provisioned anything.
pub fn revoke_for_payment(
    conn: &mut Connection,
    caller: &Caller,
    payment_id: &str,
    reason: &str,
    now: i64,
) -> Result<Option<License>> {
    require_privileged(caller, "revoke licenses")?;
    let Some(record) = queries::get_provisioning_record(conn, payment_id)? else {
        return Ok(None);
    };
    revoke_license(conn, caller, &record.license_id, reason, now).map(Some)
}
