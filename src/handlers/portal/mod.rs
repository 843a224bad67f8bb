mod licenses;

pub use licenses::*;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::db::AppState;
use crate::middleware::caller_auth;

/// Customer portal: every route acts as the authenticated caller.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/me/licenses", get(list_my_licenses))
        .route("/me/licenses/{license_id}/accounts", post(bind_account))
        .route(
            "/me/licenses/{license_id}/accounts/{account_id}",
            delete(unbind_account),
        )
        .route("/me/licenses/{license_id}/download", post(issue_download))
        .layer(middleware::from_fn_with_state(state, caller_auth))
}
