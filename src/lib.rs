//! EA licensing - license and trading-account entitlement service
//!
//! Issues licenses for automated trading software, enforces how many trading
//! accounts may bind to each license, and computes expiry and renewal. Ships
//! with an axum HTTP surface for the customer portal, admins, EAs and the
//! payment webhook.

pub mod config;
pub mod crypto;
pub mod db;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod extractors;
pub mod grants;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod provisioning;
pub mod rate_limit;
pub mod util;
