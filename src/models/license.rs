use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::engine::derive_status;

/// Persisted (and derived) license status.
///
/// `Expired` may be persisted by the expiry sweep, but it is normally derived
/// from `expires_at` at read time. Use [`License::effective_status`] rather than
/// reading `status` directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Expired,
    Suspended,
    Revoked,
}

/// How many trading accounts may be bound to a license at once.
///
/// Stored as an integer column where 0 means unlimited; that sentinel never
/// leaves the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "limit", rename_all = "snake_case")]
pub enum Capacity {
    Unlimited,
    Limited(u32),
}

impl Capacity {
    /// A limit of zero means unlimited, so `Limited(0)` is never constructed.
    pub fn limited(limit: u32) -> Self {
        if limit == 0 {
            Capacity::Unlimited
        } else {
            Capacity::Limited(limit)
        }
    }

    pub fn from_column(value: i64) -> Self {
        match u32::try_from(value) {
            Ok(limit) => Self::limited(limit),
            Err(_) => Capacity::Unlimited,
        }
    }

    pub fn as_column(&self) -> i64 {
        match self {
            Capacity::Unlimited => 0,
            Capacity::Limited(limit) => *limit as i64,
        }
    }

    pub fn limit(&self) -> Option<u32> {
        match self {
            Capacity::Unlimited => None,
            Capacity::Limited(limit) => Some(*limit),
        }
    }

    /// Whether one more binding fits when `active` bindings already exist.
    pub fn has_room(&self, active: u32) -> bool {
        match self {
            Capacity::Unlimited => true,
            Capacity::Limited(limit) => active < *limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub license_key: String,
    pub owner_id: String,
    pub product_id: String,
    pub product_name: String,
    pub tier_id: Option<String>,
    /// Persisted status; see [`License::effective_status`]
    pub status: LicenseStatus,
    /// None = perpetual
    pub expires_at: Option<i64>,
    pub capacity: Capacity,
    /// Incremented on every write, compared on update
    pub version: i64,
    pub revoked_at: Option<i64>,
    pub revoked_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    pub fn effective_status(&self, now: i64) -> LicenseStatus {
        derive_status(self, now)
    }

    pub fn is_active_at(&self, now: i64) -> bool {
        self.effective_status(now) == LicenseStatus::Active
    }
}

/// Values for a freshly issued license row.
#[derive(Debug, Clone)]
pub struct NewLicense {
    pub owner_id: String,
    pub product_id: String,
    pub product_name: String,
    pub tier_id: Option<String>,
    pub expires_at: Option<i64>,
    pub capacity: Capacity,
}

/// Field changes applied by a versioned license update.
#[derive(Debug, Clone, Default)]
pub struct LicenseChanges {
    pub status: Option<LicenseStatus>,
    /// Some(None) makes the license perpetual
    pub expires_at: Option<Option<i64>>,
    pub tier_id: Option<Option<String>>,
    pub capacity: Option<Capacity>,
    pub revoked: Option<(i64, String)>,
}
