mod payments;

pub use payments::*;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/payments", post(handle_payment_webhook))
}
