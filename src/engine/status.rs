use crate::models::{Binding, BindingStatus, License, LicenseStatus};

/// Effective license status at `now`.
///
/// Suspended and revoked are administrative and always win. Otherwise a
/// license whose `expires_at` is at or before `now` reads as expired, whatever
/// was persisted.
pub fn derive_status(license: &License, now: i64) -> LicenseStatus {
    match license.status {
        LicenseStatus::Suspended | LicenseStatus::Revoked => license.status,
        persisted => match license.expires_at {
            Some(expires_at) if expires_at <= now => LicenseStatus::Expired,
            _ => persisted,
        },
    }
}

/// Binding status as seen through its license: nothing is connected while
/// the license is not active.
pub fn effective_binding_status(binding: &Binding, license_status: LicenseStatus) -> BindingStatus {
    match (binding.status, license_status) {
        (BindingStatus::Active, LicenseStatus::Active) => BindingStatus::Active,
        (BindingStatus::Active, _) => BindingStatus::Inactive,
        (other, _) => other,
    }
}
