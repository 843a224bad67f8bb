use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Normalized "payment succeeded" event from any checkout provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// Provider payment/order id; doubles as the idempotency key
    pub payment_id: String,
    pub buyer_id: String,
    pub product_id: String,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(default)]
    pub promo_code: Option<String>,
}

/// Normalized refund/chargeback event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefund {
    /// Payment id of the original confirmation
    pub payment_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProvisionAction {
    Created,
    Renewed,
    /// The idempotency key was seen before; nothing was written
    Replayed,
}

/// Ledger row written once per idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub idempotency_key: String,
    pub license_id: String,
    pub action: ProvisionAction,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub promo_code: Option<String>,
    pub created_at: i64,
}

/// Payment details kept alongside a provisioning record.
#[derive(Debug, Clone, Default)]
pub struct PaymentDetails {
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub promo_code: Option<String>,
}
