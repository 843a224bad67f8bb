//! Entitlement engine: every rule about licenses and the accounts bound to them.
//!
//! Each operation takes the caller and the evaluation time explicitly. Store
//! access goes through [`crate::db::queries`]; nothing here keeps state.

mod bindings;
mod licenses;
mod status;
mod sweep;

pub use bindings::*;
pub use licenses::*;
pub use status::*;
pub use sweep::*;

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{Caller, License};

/// Load a license the caller is allowed to see. Licenses owned by someone
/// else are reported as missing.
pub(crate) fn load_license(conn: &Connection, caller: &Caller, license_id: &str) -> Result<License> {
    queries::get_license_by_id(conn, license_id)?
        .filter(|license| caller.can_access(&license.owner_id))
        .ok_or_else(|| AppError::NotFound("License not found".into()))
}

pub(crate) fn require_privileged(caller: &Caller, operation: &str) -> Result<()> {
    if caller.is_privileged() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Only administrators can {}",
            operation
        )))
    }
}
