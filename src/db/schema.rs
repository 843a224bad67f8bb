use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Portal identities (API key is stored hashed)
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('customer', 'admin')),
            api_key_hash TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        -- Pricing tiers (reference data)
        -- max_allowed_bindings: 0 = unlimited
        CREATE TABLE IF NOT EXISTS tiers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            max_allowed_bindings INTEGER NOT NULL DEFAULT 0 CHECK (max_allowed_bindings >= 0),
            price_cents INTEGER,
            currency TEXT,
            created_at INTEGER NOT NULL
        );

        -- Sellable EAs (reference data)
        -- term_months NULL = perpetual license
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            tier_id TEXT REFERENCES tiers(id),
            max_allowed_bindings INTEGER NOT NULL DEFAULT 0 CHECK (max_allowed_bindings >= 0),
            term_months INTEGER CHECK (term_months IS NULL OR term_months > 0),
            artifact_path TEXT,
            price_cents INTEGER,
            currency TEXT,
            created_at INTEGER NOT NULL
        );

        -- Licenses (never deleted; refunds revoke)
        -- expires_at NULL = perpetual, max_allowed_bindings 0 = unlimited
        -- version is compared on every update (optimistic concurrency)
        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            license_key TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            product_id TEXT NOT NULL REFERENCES products(id),
            product_name TEXT NOT NULL,
            tier_id TEXT REFERENCES tiers(id),
            status TEXT NOT NULL CHECK (status IN ('active', 'expired', 'suspended', 'revoked')),
            expires_at INTEGER,
            max_allowed_bindings INTEGER NOT NULL DEFAULT 0 CHECK (max_allowed_bindings >= 0),
            version INTEGER NOT NULL DEFAULT 1,
            revoked_at INTEGER,
            revoked_reason TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_licenses_key ON licenses(license_key);
        CREATE INDEX IF NOT EXISTS idx_licenses_owner ON licenses(owner_id, product_id);
        CREATE INDEX IF NOT EXISTS idx_licenses_active_expiry ON licenses(expires_at) WHERE status = 'active';

        -- Trading accounts bound to licenses
        CREATE TABLE IF NOT EXISTS bindings (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            account_id INTEGER NOT NULL CHECK (account_id > 0),
            display_name TEXT,
            broker TEXT,
            status TEXT NOT NULL CHECK (status IN ('active', 'inactive', 'suspended')),
            balance_cents INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_seen_at INTEGER,
            UNIQUE(license_id, account_id)
        );
        CREATE INDEX IF NOT EXISTS idx_bindings_license ON bindings(license_id, status);

        -- One row per payment id; makes provisioning replays no-ops
        CREATE TABLE IF NOT EXISTS provisioning_records (
            idempotency_key TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            action TEXT NOT NULL CHECK (action IN ('created', 'renewed')),
            amount_cents INTEGER,
            currency TEXT,
            promo_code TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_provisioning_license ON provisioning_records(license_id);

        -- License transition history
        CREATE TABLE IF NOT EXISTS license_events (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL,
            action TEXT NOT NULL,
            actor_type TEXT NOT NULL CHECK (actor_type IN ('customer', 'admin', 'system')),
            actor_id TEXT,
            details TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_license_events_license ON license_events(license_id, created_at);

        -- Every EA verification attempt; license_id NULL = unknown key
        CREATE TABLE IF NOT EXISTS license_validations (
            id TEXT PRIMARY KEY,
            license_id TEXT,
            account_id INTEGER NOT NULL,
            result TEXT NOT NULL CHECK (result IN ('valid', 'unknown_key', 'license_not_active', 'invalid_account', 'not_bound')),
            license_status TEXT,
            ip_address TEXT,
            suspicious INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_license_validations_license ON license_validations(license_id, created_at);
        "#,
    )?;
    Ok(())
}
