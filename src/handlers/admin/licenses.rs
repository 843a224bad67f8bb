use axum::{Extension, extract::State, http::StatusCode};
use chrono::Utc;
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::engine::{self, LicenseRequest, ProvisionOutcome, SweepReport};
use crate::enrichment::{self, EnrichedLicense};
use crate::error::Result;
use crate::extractors::{Json, Path, Query};
use crate::middleware::CallerContext;
use crate::models::{
    Binding, License, LicenseEvent, LicenseValidation, PaymentDetails, ProvisionAction,
};

#[derive(Debug, Deserialize)]
pub struct CreateOrRenewRequest {
    /// Retrying with the same key returns the first result
    pub idempotency_key: String,
    #[serde(flatten)]
    pub license: LicenseRequest,
}

const DEFAULT_VALIDATION_LIMIT: u32 = 100;
const MAX_VALIDATION_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct ValidationsQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct RenewRequest {
    #[serde(default)]
    pub tier_id: Option<String>,
    #[serde(default)]
    pub duration_months: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuspendRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /admin/licenses - issue a license, or renew the one the owner holds.
pub async fn create_or_renew_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Json(request): Json<CreateOrRenewRequest>,
) -> Result<(StatusCode, Json<ProvisionOutcome>)> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();

    let outcome = engine::create_or_renew_license(
        &mut conn,
        &ctx.caller,
        &request.idempotency_key,
        &request.license,
        &PaymentDetails::default(),
        now,
    )?;

    let status = match outcome.action {
        ProvisionAction::Created => StatusCode::CREATED,
        ProvisionAction::Renewed | ProvisionAction::Replayed => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// GET /admin/licenses/{license_id}
pub async fn get_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path(license_id): Path<String>,
) -> Result<Json<EnrichedLicense>> {
    let conn = state.db.get()?;
    let now = Utc::now().timestamp();
    Ok(Json(enrichment::get_enriched_license(
        &conn,
        &ctx.caller,
        &license_id,
        now,
    )?))
}

/// GET /admin/licenses/{license_id}/events - transition history, oldest first.
pub async fn list_license_events(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path(license_id): Path<String>,
) -> Result<Json<Vec<LicenseEvent>>> {
    let conn = state.db.get()?;
    let license = engine::load_license(&conn, &ctx.caller, &license_id)?;
    Ok(Json(queries::list_license_events(&conn, &license.id)?))
}

/// GET /admin/licenses/{license_id}/validations - EA check history, newest first.
pub async fn list_license_validations(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path(license_id): Path<String>,
    Query(query): Query<ValidationsQuery>,
) -> Result<Json<Vec<LicenseValidation>>> {
    let conn = state.db.get()?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_VALIDATION_LIMIT)
        .clamp(1, MAX_VALIDATION_LIMIT);
    Ok(Json(engine::list_validations(
        &conn,
        &ctx.caller,
        &license_id,
        limit,
    )?))
}

/// POST /admin/licenses/{license_id}/extend
pub async fn extend_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path(license_id): Path<String>,
    Json(request): Json<ExtendRequest>,
) -> Result<Json<License>> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();
    let license = engine::extend_expiry(&mut conn, &ctx.caller, &license_id, request.expires_at, now)?;
    Ok(Json(license))
}

/// POST /admin/licenses/{license_id}/renew
pub async fn renew_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path(license_id): Path<String>,
    Json(request): Json<RenewRequest>,
) -> Result<Json<License>> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();
    let license = engine::renew_license(
        &mut conn,
        &ctx.caller,
        &license_id,
        request.tier_id.as_deref(),
        request.duration_months,
        now,
    )?;
    Ok(Json(license))
}

/// POST /admin/licenses/{license_id}/revoke
pub async fn revoke_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path(license_id): Path<String>,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<License>> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();
    let license = engine::revoke_license(&mut conn, &ctx.caller, &license_id, &request.reason, now)?;
    Ok(Json(license))
}

/// POST /admin/licenses/{license_id}/suspend
pub async fn suspend_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path(license_id): Path<String>,
    Json(request): Json<SuspendRequest>,
) -> Result<Json<License>> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();
    let license = engine::suspend_license(
        &mut conn,
        &ctx.caller,
        &license_id,
        request.reason.as_deref(),
        now,
    )?;
    Ok(Json(license))
}

/// POST /admin/licenses/{license_id}/reinstate
pub async fn reinstate_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path(license_id): Path<String>,
) -> Result<Json<License>> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();
    let license = engine::reinstate_license(&mut conn, &ctx.caller, &license_id, now)?;
    Ok(Json(license))
}

/// POST /admin/licenses/{license_id}/accounts/{account_id}/suspend
pub async fn suspend_account(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path((license_id, account_id)): Path<(String, i64)>,
) -> Result<Json<Binding>> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();
    let binding = engine::suspend_binding(&mut conn, &ctx.caller, &license_id, account_id, now)?;
    Ok(Json(binding))
}

/// POST /admin/licenses/{license_id}/accounts/{account_id}/resume
pub async fn resume_account(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path((license_id, account_id)): Path<(String, i64)>,
) -> Result<Json<Binding>> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();
    let binding = engine::resume_binding(&mut conn, &ctx.caller, &license_id, account_id, now)?;
    Ok(Json(binding))
}

/// POST /admin/sweep - run the expiry sweep now.
pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();
    Ok(Json(engine::sweep_expired(&mut conn, now)?))
}
