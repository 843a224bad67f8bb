use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use serde_json::json;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{Caller, LicenseAction, LicenseChanges, LicenseStatus};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub licenses_expired: usize,
    pub bindings_deactivated: usize,
}

/// Persist what reads already derive: licenses past their expiry become
/// `expired` and their active bindings become inactive.
///
/// Safe to run repeatedly and alongside request traffic. A license changed
/// by someone else mid-sweep is skipped and picked up next time if still due.
pub fn sweep_expired(conn: &mut Connection, now: i64) -> Result<SweepReport> {
    let due = queries::list_licenses_due_for_expiry(conn, now)?;
    let mut report = SweepReport::default();

    for license in due {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changes = LicenseChanges {
            status: Some(LicenseStatus::Expired),
            ..Default::default()
        };
        match queries::update_license(&tx, &license, &changes, now) {
            Ok(_) => {}
            Err(AppError::Conflict(_)) => {
                tracing::debug!(license_id = %license.id, "License changed during sweep, skipping");
                continue;
            }
            Err(e) => return Err(e),
        }

        let deactivated = queries::deactivate_bindings_for_license(&tx, &license.id, now)?;
        queries::record_license_event(
            &tx,
            &license.id,
            LicenseAction::Expired,
            &Caller::System,
            Some(&json!({
                "expires_at": license.expires_at,
                "bindings_deactivated": deactivated,
            })),
            now,
        )?;
        tx.commit()?;

        report.licenses_expired += 1;
        report.bindings_deactivated += deactivated;
    }

    if report.licenses_expired > 0 {
        tracing::info!(
            licenses_expired = report.licenses_expired,
            bindings_deactivated = report.bindings_deactivated,
            "Expiry sweep complete"
        );
    }

    Ok(report)
}
