use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    /// Base64 Ed25519 secret for download grants. Required outside dev mode.
    pub grant_signing_key: Option<String>,
    /// Where EA builds are served from
    pub asset_base_url: String,
    pub payment_webhook_secret: Option<String>,
    pub notify_webhook_url: Option<String>,
    /// Seconds between expiry sweeps (0 = never)
    pub sweep_interval_secs: u64,
    /// Requests per minute per IP on public endpoints (0 = unlimited)
    pub rate_limit_standard_rpm: u32,
    pub bootstrap_admin_email: Option<String>,
}

/// Non-empty environment variable.
fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("EA_LICENSING_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let asset_base_url =
            env::var("ASSET_BASE_URL").unwrap_or_else(|_| format!("{}/assets", base_url));

        let sweep_interval_secs: u64 = env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        let rate_limit_standard_rpm: u32 = env::var("RATE_LIMIT_STANDARD_RPM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "ea_licensing.db".to_string()),
            base_url,
            dev_mode,
            grant_signing_key: non_empty("GRANT_SIGNING_KEY"),
            asset_base_url,
            payment_webhook_secret: non_empty("PAYMENT_WEBHOOK_SECRET"),
            notify_webhook_url: non_empty("NOTIFY_WEBHOOK_URL"),
            sweep_interval_secs,
            rate_limit_standard_rpm,
            bootstrap_admin_email: non_empty("BOOTSTRAP_ADMIN_EMAIL"),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
