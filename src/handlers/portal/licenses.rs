use axum::{Extension, extract::State, http::StatusCode};
use chrono::Utc;
use serde::Deserialize;

use crate::db::AppState;
use crate::engine::{self, BindOutcome};
use crate::enrichment::{self, EnrichedLicense};
use crate::error::Result;
use crate::extractors::{Json, Path};
use crate::grants::{self, GrantHandle};
use crate::middleware::CallerContext;
use crate::models::BindingMeta;

#[derive(Debug, Deserialize)]
pub struct BindAccountRequest {
    pub account_id: i64,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub broker: Option<String>,
}

/// GET /me/licenses - the caller's licenses with bindings and capacity.
pub async fn list_my_licenses(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
) -> Result<Json<Vec<EnrichedLicense>>> {
    let conn = state.db.get()?;
    let now = Utc::now().timestamp();
    let licenses = enrichment::get_enriched_licenses(&conn, &ctx.caller, &ctx.user.id, now)?;
    Ok(Json(licenses))
}

/// POST /me/licenses/{license_id}/accounts - connect a trading account.
/// 201 when a slot was taken, 200 when the account was already connected.
pub async fn bind_account(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path(license_id): Path<String>,
    Json(request): Json<BindAccountRequest>,
) -> Result<(StatusCode, Json<BindOutcome>)> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();

    let meta = BindingMeta {
        display_name: request.display_name,
        broker: request.broker,
    };
    let outcome = engine::bind_account(
        &mut conn,
        &ctx.caller,
        &license_id,
        request.account_id,
        &meta,
        now,
    )?;

    let status = match outcome {
        BindOutcome::Existing(_) => StatusCode::OK,
        BindOutcome::Created(_) | BindOutcome::Reactivated(_) => StatusCode::CREATED,
    };
    Ok((status, Json(outcome)))
}

/// DELETE /me/licenses/{license_id}/accounts/{account_id} - free a slot.
pub async fn unbind_account(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path((license_id, account_id)): Path<(String, i64)>,
) -> Result<StatusCode> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();
    engine::unbind_account(&mut conn, &ctx.caller, &license_id, account_id, now)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /me/licenses/{license_id}/download - one-hour download grant.
pub async fn issue_download(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path(license_id): Path<String>,
) -> Result<Json<GrantHandle>> {
    let conn = state.db.get()?;
    let now = Utc::now().timestamp();
    let handle = grants::issue_download_grant(
        &conn,
        &ctx.caller,
        &state.grants,
        &state.base_url,
        &license_id,
        now,
    )?;
    Ok(Json(handle))
}
