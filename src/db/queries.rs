use chrono::Utc;
use rusqlite::{Connection, ToSql, params, types::Value};
use uuid::Uuid;

use crate::crypto::hash_secret;
use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{
    BINDING_COLS, LICENSE_COLS, LICENSE_EVENT_COLS, PRODUCT_COLS, PROVISIONING_COLS, TIER_COLS,
    USER_COLS, VALIDATION_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// True when the statement failed on a UNIQUE or PRIMARY KEY constraint.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Builder for dynamic UPDATE statements with optional fields.
///
/// With `expect_version`, the statement only matches the row at that version
/// and bumps it, so a concurrent writer makes it affect zero rows.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    updated_at: Option<i64>,
    expected_version: Option<i64>,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            updated_at: None,
            expected_version: None,
        }
    }

    fn with_updated_at(mut self, at: i64) -> Self {
        self.updated_at = Some(at);
        self
    }

    fn expect_version(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value (including NULL).
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() && self.expected_version.is_none() {
            return Ok(false);
        }
        if let Some(at) = self.updated_at {
            self.fields.push(("updated_at", at.into()));
        }
        let mut sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        if self.expected_version.is_some() {
            sets.push("version = version + 1".to_string());
        }
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let mut sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        if let Some(version) = self.expected_version {
            sql.push_str(" AND version = ?");
            values.push(version.into());
        }
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Users & API Keys ============

/// Generate an API key with eal_ prefix
pub fn generate_api_key() -> String {
    format!("eal_{}", Uuid::new_v4().to_string().replace("-", ""))
}

/// Create a user with a fresh API key. Returns the plaintext key, which is
/// only ever shown once; the table stores its hash.
pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<(User, String)> {
    let id = gen_id();
    let now = now();
    let email = input.email.trim().to_lowercase();
    let api_key = generate_api_key();
    let api_key_hash = hash_secret(&api_key);

    conn.execute(
        "INSERT INTO users (id, email, name, role, api_key_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, &email, &input.name, input.role.as_ref(), &api_key_hash, now],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("A user with email {} already exists", email))
        } else {
            e.into()
        }
    })?;

    Ok((
        User {
            id,
            email,
            name: input.name.clone(),
            role: input.role,
            api_key_hash,
            created_at: now,
        },
        api_key,
    ))
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let email = email.trim().to_lowercase();
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLS),
        &[&email],
    )
}

/// Resolve a bearer API key to its user.
pub fn get_user_by_api_key(conn: &Connection, api_key: &str) -> Result<Option<User>> {
    let hash = hash_secret(api_key);
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE api_key_hash = ?1", USER_COLS),
        &[&hash],
    )
}

// ============ Tiers ============

pub fn create_tier(conn: &Connection, input: &CreateTier) -> Result<Tier> {
    let id = gen_id();
    let now = now();
    let capacity = Capacity::limited(input.max_allowed_bindings);

    conn.execute(
        "INSERT INTO tiers (id, name, max_allowed_bindings, price_cents, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.name,
            capacity.as_column(),
            input.price_cents,
            &input.currency,
            now
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Tier {} already exists", input.name))
        } else {
            e.into()
        }
    })?;

    Ok(Tier {
        id,
        name: input.name.clone(),
        default_capacity: capacity,
        price_cents: input.price_cents,
        currency: input.currency.clone(),
        created_at: now,
    })
}

pub fn get_tier_by_id(conn: &Connection, id: &str) -> Result<Option<Tier>> {
    query_one(
        conn,
        &format!("SELECT {} FROM tiers WHERE id = ?1", TIER_COLS),
        &[&id],
    )
}

pub fn list_tiers(conn: &Connection) -> Result<Vec<Tier>> {
    query_all(
        conn,
        &format!("SELECT {} FROM tiers ORDER BY name", TIER_COLS),
        &[],
    )
}

/// Fetch several tiers in one query.
pub fn get_tiers_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<Tier>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
    query_all(
        conn,
        &format!(
            "SELECT {} FROM tiers WHERE id IN ({})",
            TIER_COLS, placeholders
        ),
        &params,
    )
}

// ============ Products ============

pub fn create_product(conn: &Connection, input: &CreateProduct) -> Result<Product> {
    let id = gen_id();
    let now = now();
    let capacity = Capacity::limited(input.max_allowed_bindings);

    conn.execute(
        "INSERT INTO products (id, name, tier_id, max_allowed_bindings, term_months, artifact_path, price_cents, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &id,
            &input.name,
            &input.tier_id,
            capacity.as_column(),
            input.term_months,
            &input.artifact_path,
            input.price_cents,
            &input.currency,
            now
        ],
    )?;

    Ok(Product {
        id,
        name: input.name.clone(),
        tier_id: input.tier_id.clone(),
        default_capacity: capacity,
        term_months: input.term_months,
        artifact_path: input.artifact_path.clone(),
        price_cents: input.price_cents,
        currency: input.currency.clone(),
        created_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

pub fn list_products(conn: &Connection) -> Result<Vec<Product>> {
    query_all(
        conn,
        &format!("SELECT {} FROM products ORDER BY name", PRODUCT_COLS),
        &[],
    )
}

// ============ Licenses ============

const LICENSE_KEY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Attempts before a run of key collisions is treated as an internal failure.
pub const LICENSE_KEY_ATTEMPTS: usize = 5;

/// Generate a license key in EA-XXXXX-XXXXX-XXXXX-XXXXX-XXXXX format.
/// 25 symbols from a 32-symbol alphabet: 125 bits of entropy.
pub fn generate_license_key() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();

    let mut part = || -> String {
        (0..5)
            .map(|_| LICENSE_KEY_ALPHABET[rng.gen_range(0..LICENSE_KEY_ALPHABET.len())] as char)
            .collect()
    };

    format!("EA-{}-{}-{}-{}-{}", part(), part(), part(), part(), part())
}

/// Insert a new active license with a freshly generated key.
pub fn create_license(conn: &Connection, input: &NewLicense, now: i64) -> Result<License> {
    create_license_with_keys(conn, input, now, generate_license_key)
}

/// Insert a new active license, drawing keys from `next_key` until one is
/// not already taken.
pub fn create_license_with_keys(
    conn: &Connection,
    input: &NewLicense,
    now: i64,
    mut next_key: impl FnMut() -> String,
) -> Result<License> {
    for attempt in 1..=LICENSE_KEY_ATTEMPTS {
        let id = gen_id();
        let license_key = next_key();

        let result = conn.execute(
            "INSERT INTO licenses (id, license_key, owner_id, product_id, product_name, tier_id, status, expires_at, max_allowed_bindings, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?8, 1, ?9, ?9)",
            params![
                &id,
                &license_key,
                &input.owner_id,
                &input.product_id,
                &input.product_name,
                &input.tier_id,
                input.expires_at,
                input.capacity.as_column(),
                now
            ],
        );

        match result {
            Ok(_) => {
                return Ok(License {
                    id,
                    license_key,
                    owner_id: input.owner_id.clone(),
                    product_id: input.product_id.clone(),
                    product_name: input.product_name.clone(),
                    tier_id: input.tier_id.clone(),
                    status: LicenseStatus::Active,
                    expires_at: input.expires_at,
                    capacity: input.capacity,
                    version: 1,
                    revoked_at: None,
                    revoked_reason: None,
                    created_at: now,
                    updated_at: now,
                });
            }
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(attempt, "License key collision, retrying with a fresh key");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Internal(
        "Could not generate a unique license key".into(),
    ))
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )
}

pub fn get_license_by_key(conn: &Connection, license_key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE license_key = ?1", LICENSE_COLS),
        &[&license_key],
    )
}

/// All licenses for an owner, newest first. Includes revoked and expired ones.
pub fn list_licenses_for_owner(conn: &Connection, owner_id: &str) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC",
            LICENSE_COLS
        ),
        &[&owner_id],
    )
}

/// Most recent non-revoked license an owner holds for a product.
pub fn find_renewable_license(
    conn: &Connection,
    owner_id: &str,
    product_id: &str,
) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE owner_id = ?1 AND product_id = ?2 AND status != 'revoked'
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            LICENSE_COLS
        ),
        &[&owner_id, &product_id],
    )
}

/// Apply `changes` to a license read at `license.version`.
///
/// Fails with `Conflict` when another writer got there first; the caller
/// should re-read and retry.
pub fn update_license(
    conn: &Connection,
    license: &License,
    changes: &LicenseChanges,
    now: i64,
) -> Result<License> {
    let mut builder = UpdateBuilder::new("licenses", &license.id)
        .with_updated_at(now)
        .expect_version(license.version)
        .set_opt(
            "status",
            changes.status.map(|s| s.as_ref().to_string()),
        )
        .set_opt(
            "max_allowed_bindings",
            changes.capacity.map(|c| c.as_column()),
        );
    if let Some(expires_at) = changes.expires_at {
        builder = builder.set_nullable("expires_at", expires_at);
    }
    if let Some(tier_id) = &changes.tier_id {
        builder = builder.set_nullable("tier_id", tier_id.clone());
    }
    if let Some((revoked_at, reason)) = &changes.revoked {
        builder = builder
            .set("revoked_at", *revoked_at)
            .set("revoked_reason", reason.clone());
    }

    if !builder.execute(conn)? {
        return Err(AppError::Conflict(format!(
            "License {} was modified concurrently",
            license.id
        )));
    }

    get_license_by_id(conn, &license.id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))
}

/// Licenses still persisted as active whose expiry has passed.
pub fn list_licenses_due_for_expiry(conn: &Connection, now: i64) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= ?1",
            LICENSE_COLS
        ),
        &[&now],
    )
}

// ============ Bindings ============

pub fn get_binding(conn: &Connection, license_id: &str, account_id: i64) -> Result<Option<Binding>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM bindings WHERE license_id = ?1 AND account_id = ?2",
            BINDING_COLS
        ),
        &[&license_id, &account_id],
    )
}

pub fn count_active_bindings(conn: &Connection, license_id: &str) -> Result<u32> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bindings WHERE license_id = ?1 AND status = 'active'",
        params![license_id],
        |row| row.get(0),
    )?;
    Ok(count as u32)
}

pub fn insert_binding(
    conn: &Connection,
    license_id: &str,
    account_id: i64,
    meta: &BindingMeta,
    now: i64,
) -> Result<Binding> {
    let id = gen_id();

    conn.execute(
        "INSERT INTO bindings (id, license_id, account_id, display_name, broker, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?6)",
        params![&id, license_id, account_id, &meta.display_name, &meta.broker, now],
    )?;

    Ok(Binding {
        id,
        license_id: license_id.to_string(),
        account_id,
        display_name: meta.display_name.clone(),
        broker: meta.broker.clone(),
        status: BindingStatus::Active,
        balance_cents: None,
        created_at: now,
        updated_at: now,
        last_seen_at: None,
    })
}

/// Flip an inactive binding back to active, keeping old metadata where none is supplied.
pub fn reactivate_binding(
    conn: &Connection,
    binding: &Binding,
    meta: &BindingMeta,
    now: i64,
) -> Result<Binding> {
    let display_name = meta.display_name.clone().or_else(|| binding.display_name.clone());
    let broker = meta.broker.clone().or_else(|| binding.broker.clone());

    UpdateBuilder::new("bindings", &binding.id)
        .with_updated_at(now)
        .set("status", BindingStatus::Active.as_ref().to_string())
        .set_nullable("display_name", display_name.clone())
        .set_nullable("broker", broker.clone())
        .execute(conn)?;

    Ok(Binding {
        display_name,
        broker,
        status: BindingStatus::Active,
        updated_at: now,
        ..binding.clone()
    })
}

pub fn delete_binding(conn: &Connection, license_id: &str, account_id: i64) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM bindings WHERE license_id = ?1 AND account_id = ?2",
        params![license_id, account_id],
    )?;
    Ok(deleted > 0)
}

pub fn list_bindings_for_license(conn: &Connection, license_id: &str) -> Result<Vec<Binding>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM bindings WHERE license_id = ?1 ORDER BY created_at, account_id",
            BINDING_COLS
        ),
        &[&license_id],
    )
}

/// Every binding across an owner's licenses, in one query.
pub fn list_bindings_for_owner(conn: &Connection, owner_id: &str) -> Result<Vec<Binding>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM bindings WHERE license_id IN (SELECT id FROM licenses WHERE owner_id = ?1)
             ORDER BY created_at, account_id",
            BINDING_COLS
        ),
        &[&owner_id],
    )
}

pub fn set_binding_status(
    conn: &Connection,
    id: &str,
    status: BindingStatus,
    now: i64,
) -> Result<bool> {
    UpdateBuilder::new("bindings", id)
        .with_updated_at(now)
        .set("status", status.as_ref().to_string())
        .execute(conn)
}

/// Record an EA check-in: last seen time and, when reported, the balance.
pub fn record_binding_check_in(
    conn: &Connection,
    id: &str,
    balance_cents: Option<i64>,
    now: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE bindings SET last_seen_at = ?1, balance_cents = COALESCE(?2, balance_cents) WHERE id = ?3",
        params![now, balance_cents, id],
    )?;
    Ok(())
}

/// Flip every active binding of a license to inactive. Returns how many changed.
pub fn deactivate_bindings_for_license(
    conn: &Connection,
    license_id: &str,
    now: i64,
) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE bindings SET status = 'inactive', updated_at = ?1 WHERE license_id = ?2 AND status = 'active'",
        params![now, license_id],
    )?;
    Ok(changed)
}

/// Deactivate the `excess` most recently bound active accounts. Returns their
/// account ids, newest first.
pub fn deactivate_newest_bindings(
    conn: &Connection,
    license_id: &str,
    excess: u32,
    now: i64,
) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id, account_id FROM bindings WHERE license_id = ?1 AND status = 'active'
         ORDER BY created_at DESC, account_id DESC LIMIT ?2",
    )?;
    let newest = stmt
        .query_map(params![license_id, excess], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (id, _) in &newest {
        conn.execute(
            "UPDATE bindings SET status = 'inactive', updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
    }
    Ok(newest.into_iter().map(|(_, account_id)| account_id).collect())
}

// ============ Provisioning Records ============

pub fn get_provisioning_record(
    conn: &Connection,
    idempotency_key: &str,
) -> Result<Option<ProvisioningRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM provisioning_records WHERE idempotency_key = ?1",
            PROVISIONING_COLS
        ),
        &[&idempotency_key],
    )
}

pub fn insert_provisioning_record(
    conn: &Connection,
    idempotency_key: &str,
    license_id: &str,
    action: ProvisionAction,
    payment: &PaymentDetails,
    now: i64,
) -> Result<ProvisioningRecord> {
    conn.execute(
        "INSERT INTO provisioning_records (idempotency_key, license_id, action, amount_cents, currency, promo_code, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            idempotency_key,
            license_id,
            action.as_ref(),
            payment.amount_cents,
            &payment.currency,
            &payment.promo_code,
            now
        ],
    )?;

    Ok(ProvisioningRecord {
        idempotency_key: idempotency_key.to_string(),
        license_id: license_id.to_string(),
        action,
        amount_cents: payment.amount_cents,
        currency: payment.currency.clone(),
        promo_code: payment.promo_code.clone(),
        created_at: now,
    })
}

// ============ License Events ============

pub fn record_license_event(
    conn: &Connection,
    license_id: &str,
    action: LicenseAction,
    caller: &Caller,
    details: Option<&serde_json::Value>,
    now: i64,
) -> Result<()> {
    let details_str = details.map(|d| d.to_string());

    conn.execute(
        "INSERT INTO license_events (id, license_id, action, actor_type, actor_id, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            gen_id(),
            license_id,
            action.as_ref(),
            caller.actor_type(),
            caller.actor_id(),
            &details_str,
            now
        ],
    )?;
    Ok(())
}

pub fn list_license_events(conn: &Connection, license_id: &str) -> Result<Vec<LicenseEvent>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM license_events WHERE license_id = ?1 ORDER BY created_at, rowid",
            LICENSE_EVENT_COLS
        ),
        &[&license_id],
    )
}

// ============ License Validations ============

pub fn record_validation(
    conn: &Connection,
    input: &NewValidation,
    now: i64,
) -> Result<LicenseValidation> {
    let validation = LicenseValidation {
        id: gen_id(),
        license_id: input.license_id.map(str::to_string),
        account_id: input.account_id,
        result: input.result,
        license_status: input.license_status,
        ip_address: input.ip_address.map(str::to_string),
        suspicious: input.result.is_suspicious(),
        created_at: now,
    };

    conn.execute(
        "INSERT INTO license_validations (id, license_id, account_id, result, license_status, ip_address, suspicious, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &validation.id,
            &validation.license_id,
            validation.account_id,
            validation.result.as_ref(),
            validation.license_status.map(|s| s.as_ref().to_string()),
            &validation.ip_address,
            validation.suspicious,
            now
        ],
    )?;
    Ok(validation)
}

/// Newest first, capped at `limit` rows.
pub fn list_validations_for_license(
    conn: &Connection,
    license_id: &str,
    limit: u32,
) -> Result<Vec<LicenseValidation>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM license_validations WHERE license_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            VALIDATION_COLS
        ),
        &[&license_id, &limit],
    )
}
