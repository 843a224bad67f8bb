use axum::{extract::State, response::Redirect};
use chrono::Utc;
use serde::Deserialize;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Query;
use crate::grants;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub grant: String,
}

/// GET /download?grant= - exchange a download grant for the EA build.
/// Redirects to the asset store; the grant is the only credential.
pub async fn download_artifact(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Redirect> {
    let conn = state.db.get()?;
    let now = Utc::now().timestamp();

    let (license, product) = grants::redeem_download_grant(&conn, &state.grants, &query.grant, now)?;

    let artifact_path = product
        .artifact_path
        .as_deref()
        .ok_or_else(|| AppError::NotFound("No build is available for this product".into()))?;
    let location = format!(
        "{}/{}",
        state.asset_base_url.trim_end_matches('/'),
        artifact_path.trim_start_matches('/')
    );

    tracing::info!(license_id = %license.id, product_id = %product.id, "Download grant redeemed");
    Ok(Redirect::temporary(&location))
}
