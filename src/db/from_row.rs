//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str = "id, email, name, role, api_key_hash, created_at";

pub const TIER_COLS: &str = "id, name, max_allowed_bindings, price_cents, currency, created_at";

pub const PRODUCT_COLS: &str = "id, name, tier_id, max_allowed_bindings, term_months, artifact_path, price_cents, currency, created_at";

pub const LICENSE_COLS: &str = "id, license_key, owner_id, product_id, product_name, tier_id, status, expires_at, max_allowed_bindings, version, revoked_at, revoked_reason, created_at, updated_at";

pub const BINDING_COLS: &str = "id, license_id, account_id, display_name, broker, status, balance_cents, created_at, updated_at, last_seen_at";

pub const PROVISIONING_COLS: &str =
    "idempotency_key, license_id, action, amount_cents, currency, promo_code, created_at";

pub const LICENSE_EVENT_COLS: &str =
    "id, license_id, action, actor_type, actor_id, details, created_at";

pub const VALIDATION_COLS: &str =
    "id, license_id, account_id, result, license_status, ip_address, suspicious, created_at";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            role: parse_enum(row, 3, "role")?,
            api_key_hash: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for Tier {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Tier {
            id: row.get(0)?,
            name: row.get(1)?,
            default_capacity: Capacity::from_column(row.get(2)?),
            price_cents: row.get(3)?,
            currency: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            tier_id: row.get(2)?,
            default_capacity: Capacity::from_column(row.get(3)?),
            term_months: row.get(4)?,
            artifact_path: row.get(5)?,
            price_cents: row.get(6)?,
            currency: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            license_key: row.get(1)?,
            owner_id: row.get(2)?,
            product_id: row.get(3)?,
            product_name: row.get(4)?,
            tier_id: row.get(5)?,
            status: parse_enum(row, 6, "status")?,
            expires_at: row.get(7)?,
            capacity: Capacity::from_column(row.get(8)?),
            version: row.get(9)?,
            revoked_at: row.get(10)?,
            revoked_reason: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

impl FromRow for Binding {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Binding {
            id: row.get(0)?,
            license_id: row.get(1)?,
            account_id: row.get(2)?,
            display_name: row.get(3)?,
            broker: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            balance_cents: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            last_seen_at: row.get(9)?,
        })
    }
}

impl FromRow for ProvisioningRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProvisioningRecord {
            idempotency_key: row.get(0)?,
            license_id: row.get(1)?,
            action: parse_enum(row, 2, "action")?,
            amount_cents: row.get(3)?,
            currency: row.get(4)?,
            promo_code: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for LicenseEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let details: Option<String> = row.get(5)?;
        Ok(LicenseEvent {
            id: row.get(0)?,
            license_id: row.get(1)?,
            action: parse_enum(row, 2, "action")?,
            actor_type: row.get(3)?,
            actor_id: row.get(4)?,
            details: details.and_then(|d| serde_json::from_str(&d).ok()),
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for LicenseValidation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let license_status = match row.get::<_, Option<String>>(4)? {
            Some(status) => Some(status.parse().map_err(|_| {
                rusqlite::Error::InvalidColumnType(4, "license_status".into(), rusqlite::types::Type::Text)
            })?),
            None => None,
        };
        Ok(LicenseValidation {
            id: row.get(0)?,
            license_id: row.get(1)?,
            account_id: row.get(2)?,
            result: parse_enum(row, 3, "result")?,
            license_status,
            ip_address: row.get(5)?,
            suspicious: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}
