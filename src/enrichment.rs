//! Read-only views joining licenses with their bindings and tiers.

use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::engine::{effective_binding_status, load_license};
use crate::error::Result;
use crate::models::*;

#[derive(Debug, Clone, Serialize)]
pub struct EnrichedBinding {
    pub account_id: i64,
    pub display_name: Option<String>,
    pub broker: Option<String>,
    /// Status as seen through the license
    pub status: BindingStatus,
    pub balance_cents: Option<i64>,
    pub created_at: i64,
    pub last_seen_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichedLicense {
    pub id: String,
    pub license_key: String,
    pub owner_id: String,
    pub product_id: String,
    pub product_name: String,
    pub tier_id: Option<String>,
    pub tier_name: Option<String>,
    /// Derived status at read time
    pub status: LicenseStatus,
    pub expires_at: Option<i64>,
    pub max_allowed_bindings: Capacity,
    pub connected_count: u32,
    pub can_connect: bool,
    pub bindings: Vec<EnrichedBinding>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn enrich(license: License, bindings: Vec<Binding>, tier: Option<&Tier>, now: i64) -> EnrichedLicense {
    let status = license.effective_status(now);

    let bindings: Vec<EnrichedBinding> = bindings
        .into_iter()
        .map(|b| EnrichedBinding {
            status: effective_binding_status(&b, status),
            account_id: b.account_id,
            display_name: b.display_name,
            broker: b.broker,
            balance_cents: b.balance_cents,
            created_at: b.created_at,
            last_seen_at: b.last_seen_at,
        })
        .collect();

    let connected_count = bindings
        .iter()
        .filter(|b| b.status == BindingStatus::Active)
        .count() as u32;
    let can_connect = status == LicenseStatus::Active && license.capacity.has_room(connected_count);

    EnrichedLicense {
        tier_name: tier.map(|t| t.name.clone()),
        status,
        max_allowed_bindings: license.capacity,
        connected_count,
        can_connect,
        bindings,
        id: license.id,
        license_key: license.license_key,
        owner_id: license.owner_id,
        product_id: license.product_id,
        product_name: license.product_name,
        tier_id: license.tier_id,
        expires_at: license.expires_at,
        created_at: license.created_at,
        updated_at: license.updated_at,
    }
}

/// Every license an owner holds, newest first, with bindings and tier.
/// Three queries regardless of how many licenses there are.
pub fn get_enriched_licenses(
    conn: &Connection,
    caller: &Caller,
    owner_id: &str,
    now: i64,
) -> Result<Vec<EnrichedLicense>> {
    if !caller.can_access(owner_id) {
        return Ok(Vec::new());
    }

    let licenses = queries::list_licenses_for_owner(conn, owner_id)?;

    let mut bindings_by_license: HashMap<String, Vec<Binding>> = HashMap::new();
    for binding in queries::list_bindings_for_owner(conn, owner_id)? {
        bindings_by_license
            .entry(binding.license_id.clone())
            .or_default()
            .push(binding);
    }

    let mut tier_ids: Vec<String> = licenses.iter().filter_map(|l| l.tier_id.clone()).collect();
    tier_ids.sort();
    tier_ids.dedup();
    let tiers: HashMap<String, Tier> = queries::get_tiers_by_ids(conn, &tier_ids)?
        .into_iter()
        .map(|t| (t.id.clone(), t))
        .collect();

    Ok(licenses
        .into_iter()
        .map(|license| {
            let bindings = bindings_by_license.remove(&license.id).unwrap_or_default();
            let tier = license.tier_id.as_ref().and_then(|id| tiers.get(id));
            enrich(license, bindings, tier, now)
        })
        .collect())
}

/// One license with bindings and tier.
pub fn get_enriched_license(
    conn: &Connection,
    caller: &Caller,
    license_id: &str,
    now: i64,
) -> Result<EnrichedLicense> {
    let license = load_license(conn, caller, license_id)?;
    let bindings = queries::list_bindings_for_license(conn, &license.id)?;
    let tier = match &license.tier_id {
        Some(id) => queries::get_tier_by_id(conn, id)?,
        None => None,
    };
    Ok(enrich(license, bindings, tier.as_ref(), now))
}
