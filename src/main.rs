use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ea_licensing::config::Config;
use ea_licensing::db::{AppState, DbPool, create_pool, init_db, queries};
use ea_licensing::engine::{self, sweep_expired};
use ea_licensing::grants::GrantSigner;
use ea_licensing::handlers;
use ea_licensing::models::{Caller, CreateProduct, CreateTier, CreateUser, UserRole};
use ea_licensing::notify::Notifier;
use ea_licensing::rate_limit;

#[derive(Parser, Debug)]
#[command(name = "ea-licensing")]
#[command(about = "License and trading-account entitlement service for EAs")]
struct Cli {
    /// Seed the database with dev data (admin, customer, tier, product, license)
    #[arg(long)]
    seed: bool,

    /// Run one expiry sweep and exit
    #[arg(long)]
    sweep: bool,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn bootstrap_admin(pool: &DbPool, email: &str) -> anyhow::Result<()> {
    let conn = pool.get().context("Failed to get db connection for bootstrap")?;

    if queries::get_user_by_email(&conn, email)?.is_some() {
        tracing::info!("Bootstrap admin {} already exists, skipping", email);
        return Ok(());
    }

    let (user, api_key) = queries::create_user(
        &conn,
        &CreateUser {
            email: email.to_string(),
            name: "Bootstrap Admin".to_string(),
            role: UserRole::Admin,
        },
    )?;

    tracing::info!("============================================");
    tracing::info!("BOOTSTRAP ADMIN CREATED");
    tracing::info!("Email: {}", user.email);
    tracing::info!("API Key: {}", api_key);
    tracing::info!("============================================");
    tracing::info!("SAVE THIS API KEY - IT WILL NOT BE SHOWN AGAIN");
    tracing::info!("============================================");
    Ok(())
}

/// Dev data for trying the API by hand. Skipped when the dev admin exists.
fn seed_dev_data(pool: &DbPool) -> anyhow::Result<()> {
    const DEV_ADMIN_EMAIL: &str = "admin@ea-licensing.local";

    let mut conn = pool.get().context("Failed to get db connection for seeding")?;
    if queries::get_user_by_email(&conn, DEV_ADMIN_EMAIL)?.is_some() {
        tracing::info!("Database already has data, skipping seed");
        return Ok(());
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let (admin, admin_key) = queries::create_user(
        &conn,
        &CreateUser {
            email: DEV_ADMIN_EMAIL.to_string(),
            name: "Dev Admin".to_string(),
            role: UserRole::Admin,
        },
    )?;
    let (customer, customer_key) = queries::create_user(
        &conn,
        &CreateUser {
            email: "trader@ea-licensing.local".to_string(),
            name: "Dev Trader".to_string(),
            role: UserRole::Customer,
        },
    )?;

    let tier = queries::create_tier(
        &conn,
        &CreateTier {
            name: "Standard".to_string(),
            max_allowed_bindings: 3,
            price_cents: Some(9900),
            currency: Some("USD".to_string()),
        },
    )?;
    let product = queries::create_product(
        &conn,
        &CreateProduct {
            name: "Trend Scalper EA".to_string(),
            tier_id: Some(tier.id.clone()),
            max_allowed_bindings: 1,
            term_months: Some(12),
            artifact_path: Some("trend-scalper/TrendScalper.ex5".to_string()),
            price_cents: Some(9900),
            currency: Some("USD".to_string()),
        },
    )?;

    let outcome = engine::create_or_renew_license(
        &mut conn,
        &Caller::Admin(admin.id.clone()),
        "seed-dev-license",
        &engine::LicenseRequest {
            owner_id: customer.id.clone(),
            product_id: product.id.clone(),
            tier_id: None,
            duration_months: None,
        },
        &Default::default(),
        now(),
    )?;

    tracing::info!("Admin: {} ({})", admin.email, admin.id);
    tracing::info!("Customer: {} ({})", customer.email, customer.id);
    tracing::info!("Tier: {} (id: {})", tier.name, tier.id);
    tracing::info!("Product: {} (id: {})", product.name, product.id);
    tracing::info!("License: {} (id: {})", outcome.license.license_key, outcome.license.id);

    println!();
    println!("--- COPY FROM HERE ---");
    println!("  admin_api_key: {}", admin_key);
    println!("  customer_api_key: {}", customer_key);
    println!("  product_id: {}", product.id);
    println!("  license_id: {}", outcome.license.id);
    println!("  license_key: {}", outcome.license.license_key);
    println!("--- END COPY ---");
    println!();
    Ok(())
}

fn run_sweep(pool: &DbPool) -> anyhow::Result<()> {
    let mut conn = pool.get().context("Failed to get db connection for sweep")?;
    let report = sweep_expired(&mut conn, now())?;
    tracing::info!(
        licenses_expired = report.licenses_expired,
        bindings_deactivated = report.bindings_deactivated,
        "Sweep finished"
    );
    Ok(())
}

/// Persist expiries in the background. Reads derive status on their own, so
/// a missed run only delays binding cleanup.
fn spawn_sweep_task(pool: DbPool, interval_secs: u64) {
    if interval_secs == 0 {
        tracing::info!("Background expiry sweep disabled");
        return;
    }

    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs);

        loop {
            tokio::time::sleep(interval).await;

            let pool = pool.clone();
            let result = tokio::task::spawn_blocking(move || {
                let mut conn = pool.get()?;
                sweep_expired(&mut conn, now())
            })
            .await;

            match result {
                Ok(Ok(report)) => {
                    if report.licenses_expired > 0 {
                        tracing::debug!("Sweep expired {} licenses", report.licenses_expired);
                    }
                }
                Ok(Err(e)) => tracing::warn!("Expiry sweep failed: {}", e),
                Err(e) => tracing::warn!("Expiry sweep task panicked: {}", e),
            }
        }
    });

    tracing::info!("Background expiry sweep started (runs every {}s)", interval_secs);
}

fn load_grant_signer(config: &Config) -> anyhow::Result<GrantSigner> {
    match &config.grant_signing_key {
        Some(key) => GrantSigner::from_base64(key).context("GRANT_SIGNING_KEY is invalid"),
        None if config.dev_mode => {
            tracing::warn!("GRANT_SIGNING_KEY not set, using a throwaway key (dev mode)");
            GrantSigner::generate().context("Failed to generate grant key")
        }
        None => bail!("GRANT_SIGNING_KEY must be set outside dev mode"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ea_licensing=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).context("Failed to create database pool")?;
    {
        let conn = db_pool.get().context("Failed to get connection")?;
        init_db(&conn).context("Failed to initialize database")?;
    }

    if cli.sweep {
        return run_sweep(&db_pool);
    }

    if cli.seed {
        if config.dev_mode {
            seed_dev_data(&db_pool)?;
        } else {
            tracing::warn!("--seed flag ignored: not in dev mode (set EA_LICENSING_ENV=dev)");
        }
    }

    if let Some(ref email) = config.bootstrap_admin_email {
        bootstrap_admin(&db_pool, email)?;
    }

    let grants = load_grant_signer(&config)?;
    tracing::info!("Grant public key: {}", grants.public_key_base64());

    if config.payment_webhook_secret.is_none() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set, payment webhooks will be rejected");
    }

    let state = AppState {
        db: db_pool.clone(),
        base_url: config.base_url.clone(),
        grants: Arc::new(grants),
        notifier: Notifier::new(config.notify_webhook_url.clone()),
        payment_webhook_secret: config.payment_webhook_secret.clone(),
        asset_base_url: config.asset_base_url.clone(),
    };

    spawn_sweep_task(db_pool, config.sweep_interval_secs);

    let mut public = handlers::public::router();
    if let Some(layer) = rate_limit::standard_layer(config.rate_limit_standard_rpm) {
        public = public.layer(layer);
    }

    let mut app = Router::new()
        .merge(handlers::public::health_router())
        // EA runtime checks and grant exchange (rate limited, no auth)
        .merge(public)
        // Payment provider (HMAC signature)
        .merge(handlers::webhooks::router())
        // Customer portal (API key)
        .merge(handlers::portal::router(state.clone()))
        // Admin API (admin API key)
        .merge(handlers::admin::router(state.clone()))
        .layer(TraceLayer::new_for_http());

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let app = app.with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("EA licensing server listening on {}", addr);

    // Connect info feeds the per-IP rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}
