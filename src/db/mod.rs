pub mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::grants::GrantSigner;
use crate::notify::Notifier;

pub type DbPool = Pool<SqliteConnectionManager>;

/// How long a pooled connection waits on a locked database before the
/// store error surfaces to the caller.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Public base URL (e.g., https://licenses.example.com), used in grant exchange links
    pub base_url: String,
    /// Signs and verifies download grants
    pub grants: Arc<GrantSigner>,
    /// Delivers "license ready" notifications
    pub notifier: Notifier,
    /// HMAC secret for the payment webhook; None rejects every delivery
    pub payment_webhook_secret: Option<String>,
    /// Where EA builds are served from; grants redirect here
    pub asset_base_url: String,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
    });
    Pool::builder().max_size(10).build(manager)
}
