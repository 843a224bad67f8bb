mod catalog;
mod licenses;
mod users;

pub use catalog::*;
pub use licenses::*;
pub use users::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;
use crate::middleware::require_admin;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // Identities and reference data
        .route("/admin/users", post(create_user))
        .route("/admin/users/{user_id}/licenses", get(list_user_licenses))
        .route("/admin/tiers", post(create_tier).get(list_tiers))
        .route("/admin/products", post(create_product).get(list_products))
        // License lifecycle
        .route("/admin/licenses", post(create_or_renew_license))
        .route("/admin/licenses/{license_id}", get(get_license))
        .route("/admin/licenses/{license_id}/events", get(list_license_events))
        .route(
            "/admin/licenses/{license_id}/validations",
            get(list_license_validations),
        )
        .route("/admin/licenses/{license_id}/extend", post(extend_license))
        .route("/admin/licenses/{license_id}/renew", post(renew_license))
        .route("/admin/licenses/{license_id}/revoke", post(revoke_license))
        .route("/admin/licenses/{license_id}/suspend", post(suspend_license))
        .route("/admin/licenses/{license_id}/reinstate", post(reinstate_license))
        // Per-account blocks
        .route(
            "/admin/licenses/{license_id}/accounts/{account_id}/suspend",
            post(suspend_account),
        )
        .route(
            "/admin/licenses/{license_id}/accounts/{account_id}/resume",
            post(resume_account),
        )
        .route("/admin/sweep", post(run_sweep))
        .layer(middleware::from_fn_with_state(state, require_admin))
}
