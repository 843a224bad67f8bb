use axum::{Extension, extract::State, http::StatusCode};
use chrono::Utc;
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::enrichment::{self, EnrichedLicense};
use crate::error::Result;
use crate::extractors::{Json, Path};
use crate::middleware::CallerContext;
use crate::models::{CreateUser, User};

#[derive(Debug, Serialize)]
pub struct CreatedUser {
    pub user: User,
    /// Shown once; only its hash is stored
    pub api_key: String,
}

/// POST /admin/users - register a portal identity and mint its API key.
pub async fn create_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Json(input): Json<CreateUser>,
) -> Result<(StatusCode, Json<CreatedUser>)> {
    input.validate()?;

    let conn = state.db.get()?;
    let (user, api_key) = queries::create_user(&conn, &input)?;

    tracing::info!(
        user_id = %user.id,
        role = user.role.as_ref(),
        created_by = %ctx.user.id,
        "User created"
    );
    Ok((StatusCode::CREATED, Json(CreatedUser { user, api_key })))
}

/// GET /admin/users/{user_id}/licenses - a customer's licenses as they see them.
pub async fn list_user_licenses(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallerContext>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<EnrichedLicense>>> {
    let conn = state.db.get()?;
    let now = Utc::now().timestamp();
    let licenses = enrichment::get_enriched_licenses(&conn, &ctx.caller, &user_id, now)?;
    Ok(Json(licenses))
}
