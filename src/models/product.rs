use serde::{Deserialize, Serialize};

use super::Capacity;
use crate::error::{AppError, Result};

/// Pricing tier reference data. Read-only from the engine's point of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier {
    pub id: String,
    pub name: String,
    pub default_capacity: Capacity,
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateTier {
    pub name: String,
    #[serde(default)]
    pub max_allowed_bindings: u32,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl CreateTier {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("name", "must not be empty"));
        }
        if self.price_cents.is_some_and(|p| p < 0) {
            return Err(AppError::validation("price_cents", "must not be negative"));
        }
        Ok(())
    }
}

/// A sellable EA. Resolves a payment into a tier and a license term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub tier_id: Option<String>,
    /// Used when the license has no tier
    pub default_capacity: Capacity,
    /// None = perpetual license
    pub term_months: Option<u32>,
    /// Location of the EA build, relative to the asset store
    pub artifact_path: Option<String>,
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    #[serde(default)]
    pub tier_id: Option<String>,
    #[serde(default)]
    pub max_allowed_bindings: u32,
    #[serde(default)]
    pub term_months: Option<u32>,
    #[serde(default)]
    pub artifact_path: Option<String>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl CreateProduct {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("name", "must not be empty"));
        }
        if self.term_months == Some(0) {
            return Err(AppError::validation(
                "term_months",
                "must be greater than zero (omit for perpetual)",
            ));
        }
        if self.price_cents.is_some_and(|p| p < 0) {
            return Err(AppError::validation("price_cents", "must not be negative"));
        }
        Ok(())
    }
}
