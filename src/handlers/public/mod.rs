mod download;
mod verify;

pub use download::*;
pub use verify::*;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Liveness check; never rate limited.
pub fn health_router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// Unauthenticated endpoints called by EAs and download links.
pub fn router() -> Router<AppState> {
    Router::new()
        // License key in Authorization header, never in the URL
        .route("/licenses/verify", post(verify_license))
        .route("/download", get(download_artifact))
}
