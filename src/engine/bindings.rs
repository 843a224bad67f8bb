use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use serde_json::json;

use super::{load_license, require_privileged};
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::*;

const MAX_META_LEN: usize = 100;

/// Result of a bind request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "binding", rename_all = "snake_case")]
pub enum BindOutcome {
    /// A new binding row was inserted
    Created(Binding),
    /// An inactive binding took a slot again
    Reactivated(Binding),
    /// The account was already bound and active; nothing changed
    Existing(Binding),
}

impl BindOutcome {
    pub fn binding(&self) -> &Binding {
        match self {
            BindOutcome::Created(b) | BindOutcome::Reactivated(b) | BindOutcome::Existing(b) => b,
        }
    }

    pub fn into_binding(self) -> Binding {
        match self {
            BindOutcome::Created(b) | BindOutcome::Reactivated(b) | BindOutcome::Existing(b) => b,
        }
    }
}

/// Result of an EA runtime check. Deliberately thin: a failed check says
/// nothing beyond the license's derived status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LicenseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Verification {
    fn invalid(status: Option<LicenseStatus>) -> Self {
        Self {
            valid: false,
            status,
            expires_at: None,
        }
    }
}

fn validate_account_id(account_id: i64) -> Result<()> {
    if account_id <= 0 {
        return Err(AppError::validation(
            "account_id",
            "must be a positive integer",
        ));
    }
    Ok(())
}

fn normalize_meta(meta: &BindingMeta) -> Result<BindingMeta> {
    fn clean(field: &'static str, value: &Option<String>) -> Result<Option<String>> {
        let value = value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty());
        match value {
            Some(v) if v.chars().count() > MAX_META_LEN => Err(AppError::validation(
                field,
                format!("must be at most {} characters", MAX_META_LEN),
            )),
            other => Ok(other.map(String::from)),
        }
    }

    Ok(BindingMeta {
        display_name: clean("display_name", &meta.display_name)?,
        broker: clean("broker", &meta.broker)?,
    })
}

/// Bind a trading account to a license.
///
/// The status check, the active count and the insert run in one IMMEDIATE
/// transaction. SQLite takes the write lock before the count is read, so
/// concurrent binds on the same license are serialized and the active count
/// can never pass the limit. (On PostgreSQL, the equivalent is
/// `SELECT ... FOR UPDATE` on the license row.)
pub fn bind_account(
    conn: &mut Connection,
    caller: &Caller,
    license_id: &str,
    account_id: i64,
    meta: &BindingMeta,
    now: i64,
) -> Result<BindOutcome> {
    validate_account_id(account_id)?;
    let meta = normalize_meta(meta)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let license = load_license(&tx, caller, license_id)?;
    let status = license.effective_status(now);
    if status != LicenseStatus::Active {
        return Err(AppError::LicenseNotActive { status });
    }

    let existing = queries::get_binding(&tx, license_id, account_id)?;
    match &existing {
        Some(binding) if binding.status == BindingStatus::Active => {
            return Ok(BindOutcome::Existing(binding.clone()));
        }
        Some(binding) if binding.status == BindingStatus::Suspended => {
            return Err(AppError::Forbidden(format!(
                "Account {} is suspended on this license",
                account_id
            )));
        }
        _ => {}
    }

    let current = queries::count_active_bindings(&tx, license_id)?;
    if !license.capacity.has_room(current) {
        let limit = license.capacity.limit().unwrap_or(current);
        tracing::info!(license_id, account_id, current, limit, "Bind refused: account limit reached");
        return Err(AppError::CapacityExceeded { current, limit });
    }

    let outcome = match existing {
        Some(binding) => {
            BindOutcome::Reactivated(queries::reactivate_binding(&tx, &binding, &meta, now)?)
        }
        None => BindOutcome::Created(queries::insert_binding(&tx, license_id, account_id, &meta, now)?),
    };

    queries::record_license_event(
        &tx,
        license_id,
        LicenseAction::AccountBound,
        caller,
        Some(&json!({
            "account_id": account_id,
            "reactivated": matches!(outcome, BindOutcome::Reactivated(_)),
        })),
        now,
    )?;
    tx.commit()?;

    tracing::info!(license_id, account_id, active = current + 1, "Account bound");
    Ok(outcome)
}

/// Remove a binding. Works whatever the license status, so a customer can
/// free slots on an expired license. Absent bindings are not an error.
pub fn unbind_account(
    conn: &mut Connection,
    caller: &Caller,
    license_id: &str,
    account_id: i64,
    now: i64,
) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    load_license(&tx, caller, license_id)?;

    if queries::delete_binding(&tx, license_id, account_id)? {
        queries::record_license_event(
            &tx,
            license_id,
            LicenseAction::AccountUnbound,
            caller,
            Some(&json!({ "account_id": account_id })),
            now,
        )?;
        tx.commit()?;
        tracing::info!(license_id, account_id, "Account unbound");
    }

    Ok(())
}

fn load_binding(conn: &Connection, license_id: &str, account_id: i64) -> Result<Binding> {
    queries::get_binding(conn, license_id, account_id)?
        .ok_or_else(|| AppError::NotFound("Account binding not found".into()))
}

/// Block one account on a license. Suspended bindings do not count towards
/// capacity and cannot be rebound by the customer.
pub fn suspend_binding(
    conn: &mut Connection,
    caller: &Caller,
    license_id: &str,
    account_id: i64,
    now: i64,
) -> Result<Binding> {
    require_privileged(caller, "suspend accounts")?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    load_license(&tx, caller, license_id)?;
    let binding = load_binding(&tx, license_id, account_id)?;

    if binding.status == BindingStatus::Suspended {
        return Ok(binding);
    }

    queries::set_binding_status(&tx, &binding.id, BindingStatus::Suspended, now)?;
    queries::record_license_event(
        &tx,
        license_id,
        LicenseAction::AccountSuspended,
        caller,
        Some(&json!({ "account_id": account_id })),
        now,
    )?;
    tx.commit()?;

    tracing::info!(license_id, account_id, "Account suspended");
    Ok(Binding {
        status: BindingStatus::Suspended,
        updated_at: now,
        ..binding
    })
}

/// Lift an account block. The binding comes back inactive; taking a slot
/// again goes through a normal (capacity-checked) bind.
pub fn resume_binding(
    conn: &mut Connection,
    caller: &Caller,
    license_id: &str,
    account_id: i64,
    now: i64,
) -> Result<Binding> {
    require_privileged(caller, "resume accounts")?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    load_license(&tx, caller, license_id)?;
    let binding = load_binding(&tx, license_id, account_id)?;

    if binding.status != BindingStatus::Suspended {
        return Err(AppError::validation("status", "account is not suspended"));
    }

    queries::set_binding_status(&tx, &binding.id, BindingStatus::Inactive, now)?;
    queries::record_license_event(
        &tx,
        license_id,
        LicenseAction::AccountResumed,
        caller,
        Some(&json!({ "account_id": account_id })),
        now,
    )?;
    tx.commit()?;

    tracing::info!(license_id, account_id, "Account resumed");
    Ok(Binding {
        status: BindingStatus::Inactive,
        updated_at: now,
        ..binding
    })
}

/// Runtime check made by the EA: is this account allowed to trade under
/// this key right now? A successful check records the balance snapshot.
///
/// Every attempt, unknown keys included, lands in the validation log.
pub fn verify_binding(
    conn: &Connection,
    license_key: &str,
    account_id: i64,
    balance_cents: Option<i64>,
    client_ip: Option<&str>,
    now: i64,
) -> Result<Verification> {
    let Some(license) = queries::get_license_by_key(conn, license_key.trim())? else {
        let attempt = NewValidation {
            license_id: None,
            account_id,
            result: ValidationResult::UnknownKey,
            license_status: None,
            ip_address: client_ip,
        };
        queries::record_validation(conn, &attempt, now)?;
        return Ok(Verification::invalid(None));
    };

    let status = license.effective_status(now);
    let result = if status != LicenseStatus::Active {
        ValidationResult::LicenseNotActive
    } else if account_id <= 0 {
        ValidationResult::InvalidAccount
    } else {
        match queries::get_binding(conn, &license.id, account_id)? {
            Some(binding) if binding.status == BindingStatus::Active => {
                queries::record_binding_check_in(conn, &binding.id, balance_cents, now)?;
                ValidationResult::Valid
            }
            _ => ValidationResult::NotBound,
        }
    };

    let attempt = NewValidation {
        license_id: Some(&license.id),
        account_id,
        result,
        license_status: Some(status),
        ip_address: client_ip,
    };
    queries::record_validation(conn, &attempt, now)?;

    if result != ValidationResult::Valid {
        return Ok(Verification::invalid(Some(status)));
    }
    Ok(Verification {
        valid: true,
        status: Some(status),
        expires_at: license.expires_at,
    })
}

/// Recent verification attempts for a license, newest first. Admin only.
pub fn list_validations(
    conn: &Connection,
    caller: &Caller,
    license_id: &str,
    limit: u32,
) -> Result<Vec<LicenseValidation>> {
    require_privileged(caller, "view validation history")?;
    let license = load_license(conn, caller, license_id)?;
    queries::list_validations_for_license(conn, &license.id, limit)
}
