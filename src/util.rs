//! Shared utility functions for the licensing service.

use axum::http::HeaderMap;
use chrono::{DateTime, Months};

use crate::error::{AppError, Result};

/// Add calendar months to a Unix timestamp (seconds).
///
/// Day-of-month clamps to the end of shorter months, so Jan 31 + 1 month
/// lands on the last day of February.
pub fn add_months(base_time: i64, months: u32) -> Result<i64> {
    DateTime::from_timestamp(base_time, 0)
        .and_then(|dt| dt.checked_add_months(Months::new(months)))
        .map(|dt| dt.timestamp())
        .ok_or_else(|| AppError::validation("duration_months", "resulting expiry is out of range"))
}

/// Client IP from proxy headers, for request logging.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}
