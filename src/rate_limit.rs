//! Rate limiting for the unauthenticated endpoints.
//!
//! Limits are per client IP. License keys and grants carry 125+ bits of
//! entropy, so this is about load, not brute force.
//!
//! Configure via `RATE_LIMIT_STANDARD_RPM` (default: 30, 0 disables).

use std::sync::Arc;
use std::time::Duration;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;

/// Rate limiter layer type alias using governor types directly
pub type RateLimitLayer = GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Layer allowing `requests_per_minute` per IP, refilling evenly.
/// Returns None when the limit is 0 (disabled).
pub fn standard_layer(requests_per_minute: u32) -> Option<RateLimitLayer> {
    if requests_per_minute == 0 {
        return None;
    }

    let period_secs = 60 / requests_per_minute as u64;
    let config = GovernorConfigBuilder::default()
        .period(Duration::from_secs(period_secs.max(1)))
        .burst_size(requests_per_minute)
        .finish()?;

    Some(GovernorLayer::new(Arc::new(config)))
}
