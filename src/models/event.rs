use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LicenseAction {
    Created,
    Renewed,
    Extended,
    Revoked,
    Suspended,
    Reinstated,
    Expired,
    AccountBound,
    AccountUnbound,
    AccountSuspended,
    AccountResumed,
}

/// Append-only audit trail entry for a license transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseEvent {
    pub id: String,
    pub license_id: String,
    pub action: LicenseAction,
    pub actor_type: String,
    pub actor_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: i64,
}
