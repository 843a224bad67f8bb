//! "License ready" notifications.
//!
//! When `NOTIFY_WEBHOOK_URL` is set, each newly provisioned or renewed license
//! is POSTed there as JSON (the storefront turns it into an email). Otherwise
//! notifications are logged and skipped. Delivery problems never fail the
//! provisioning that triggered them.

use reqwest::Client;
use serde::Serialize;

use crate::models::{License, ProvisionAction};

const LICENSE_READY_EVENT: &str = "license.ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyResult {
    /// The webhook accepted the payload
    Delivered,
    /// The webhook could not be reached or answered with an error
    Failed,
    /// No webhook configured
    Disabled,
}

#[derive(Debug, Serialize)]
pub struct LicenseReadyPayload<'a> {
    pub event: &'static str,
    pub action: ProvisionAction,
    pub license_id: &'a str,
    pub license_key: &'a str,
    pub owner_id: &'a str,
    pub product_id: &'a str,
    pub product_name: &'a str,
    pub expires_at: Option<i64>,
}

#[derive(Clone)]
pub struct Notifier {
    webhook_url: Option<String>,
    http_client: Client,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url,
            http_client: Client::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    pub async fn license_ready(&self, license: &License, action: ProvisionAction) -> NotifyResult {
        let Some(webhook_url) = self.webhook_url.as_deref() else {
            tracing::debug!(license_id = %license.id, "Notifications disabled, skipping license.ready");
            return NotifyResult::Disabled;
        };

        let payload = LicenseReadyPayload {
            event: LICENSE_READY_EVENT,
            action,
            license_id: &license.id,
            license_key: &license.license_key,
            owner_id: &license.owner_id,
            product_id: &license.product_id,
            product_name: &license.product_name,
            expires_at: license.expires_at,
        };

        let response = match self
            .http_client
            .post(webhook_url)
            .header("X-EA-Licensing-Event", LICENSE_READY_EVENT)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    webhook_url,
                    license_id = %license.id,
                    "Failed to deliver license.ready notification"
                );
                return NotifyResult::Failed;
            }
        };

        if response.status().is_success() {
            tracing::info!(webhook_url, license_id = %license.id, "license.ready notification delivered");
            NotifyResult::Delivered
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = %status,
                body = %body,
                webhook_url,
                license_id = %license.id,
                "license.ready webhook returned error"
            );
            NotifyResult::Failed
        }
    }
}
