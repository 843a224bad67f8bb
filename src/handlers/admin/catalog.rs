use axum::{extract::State, http::StatusCode};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{CreateProduct, CreateTier, Product, Tier};

/// POST /admin/tiers
pub async fn create_tier(
    State(state): State<AppState>,
    Json(input): Json<CreateTier>,
) -> Result<(StatusCode, Json<Tier>)> {
    input.validate()?;
    let conn = state.db.get()?;
    let tier = queries::create_tier(&conn, &input)?;
    tracing::info!(tier_id = %tier.id, name = %tier.name, "Tier created");
    Ok((StatusCode::CREATED, Json(tier)))
}

/// GET /admin/tiers
pub async fn list_tiers(State(state): State<AppState>) -> Result<Json<Vec<Tier>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_tiers(&conn)?))
}

/// POST /admin/products
pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<CreateProduct>,
) -> Result<(StatusCode, Json<Product>)> {
    input.validate()?;
    let conn = state.db.get()?;

    if let Some(tier_id) = &input.tier_id
        && queries::get_tier_by_id(&conn, tier_id)?.is_none()
    {
        return Err(AppError::validation("tier_id", format!("unknown tier {}", tier_id)));
    }

    let product = queries::create_product(&conn, &input)?;
    tracing::info!(product_id = %product.id, name = %product.name, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}

/// GET /admin/products
pub async fn list_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_products(&conn)?))
}
