use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BindingStatus {
    Active,
    Inactive,
    Suspended,
}

/// A trading account attached to a license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub id: String,
    pub license_id: String,
    /// Account number issued by the trading platform
    pub account_id: i64,
    pub display_name: Option<String>,
    pub broker: Option<String>,
    pub status: BindingStatus,
    /// Last balance reported by the EA, in cents
    pub balance_cents: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_seen_at: Option<i64>,
}

/// Display metadata supplied with a bind request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BindingMeta {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub broker: Option<String>,
}
