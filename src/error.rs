use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::models::LicenseStatus;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("License is not active (status: {status})")]
    LicenseNotActive { status: LicenseStatus },

    #[error("Account limit reached ({current}/{limit})")]
    CapacityExceeded { current: u32, limit: u32 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Stable machine-readable code, also used by webhook senders to decide on retries.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Validation { .. } => "validation_error",
            AppError::LicenseNotActive { .. } => "license_not_active",
            AppError::CapacityExceeded { .. } => "capacity_exceeded",
            AppError::Conflict(_) => "conflict",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::BadRequest(_) => "bad_request",
            AppError::Json(_) => "invalid_json",
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation { .. } | AppError::BadRequest(_) | AppError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::LicenseNotActive { .. } | AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::CapacityExceeded { .. } | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<LicenseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

impl ErrorResponse {
    fn new(error: &str, code: &'static str, details: Option<String>) -> Self {
        Self {
            error: error.to_string(),
            code,
            details,
            field: None,
            status: None,
            current: None,
            limit: None,
        }
    }
}

impl From<StatusCode> for AppError {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::UNAUTHORIZED => AppError::Unauthorized,
            StatusCode::FORBIDDEN => AppError::Forbidden("Access denied".into()),
            StatusCode::NOT_FOUND => AppError::NotFound("Resource not found".into()),
            _ => AppError::Internal(format!("Status: {}", code)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let code = self.code();
        let body = match &self {
            AppError::NotFound(msg) => ErrorResponse::new("Not found", code, Some(msg.clone())),
            AppError::Validation { field, message } => ErrorResponse {
                field: Some(field),
                ..ErrorResponse::new("Validation failed", code, Some(message.clone()))
            },
            AppError::LicenseNotActive { status } => ErrorResponse {
                status: Some(*status),
                ..ErrorResponse::new("License not active", code, Some(self.to_string()))
            },
            AppError::CapacityExceeded { current, limit } => ErrorResponse {
                current: Some(*current),
                limit: Some(*limit),
                ..ErrorResponse::new("Account limit reached", code, Some(self.to_string()))
            },
            AppError::Conflict(msg) => ErrorResponse::new("Conflict", code, Some(msg.clone())),
            AppError::Unauthorized => ErrorResponse::new("Unauthorized", code, None),
            AppError::Forbidden(msg) => ErrorResponse::new("Forbidden", code, Some(msg.clone())),
            AppError::BadRequest(msg) => {
                ErrorResponse::new("Bad request", code, Some(msg.clone()))
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                ErrorResponse::new("Invalid JSON", code, Some(e.to_string()))
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                ErrorResponse::new("Internal server error", code, None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                ErrorResponse::new("Internal server error", code, None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ErrorResponse::new("Internal server error", code, None)
            }
        };

        (status_code, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
