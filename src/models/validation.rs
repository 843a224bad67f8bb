use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::LicenseStatus;

/// Outcome of one EA verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationResult {
    Valid,
    UnknownKey,
    LicenseNotActive,
    InvalidAccount,
    NotBound,
}

impl ValidationResult {
    /// Unknown keys and unbound accounts point at a leaked or guessed key.
    pub fn is_suspicious(self) -> bool {
        matches!(self, ValidationResult::UnknownKey | ValidationResult::NotBound)
    }
}

/// Append-only record of a verification attempt, kept for admin review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseValidation {
    pub id: String,
    /// None when the presented key matched no license
    pub license_id: Option<String>,
    pub account_id: i64,
    pub result: ValidationResult,
    /// Effective license status at the time of the check
    pub license_status: Option<LicenseStatus>,
    pub ip_address: Option<String>,
    pub suspicious: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewValidation<'a> {
    pub license_id: Option<&'a str>,
    pub account_id: i64,
    pub result: ValidationResult,
    pub license_status: Option<LicenseStatus>,
    pub ip_address: Option<&'a str>,
}
