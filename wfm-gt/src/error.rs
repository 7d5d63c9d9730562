//! API error type
//!
//! Every handler returns [`ApiResult`]. Errors render as `{"error": "..."}`
//! except validation failures, which render as
//! `{"message": "...", "errors": {"field": ["..."]}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;
use wfm_common::api::{ErrorResponse, ValidationErrorResponse, ValidationErrors};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid credentials (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found, or owned by someone else (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed query parameter (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Uniqueness or tree constraint (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Field validation failed (422)
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Well-formed request whose content cannot be processed (422)
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Validation failure on a single field
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        ApiError::Validation(errors)
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        ApiError::NotFound(format!("{} {} not found", what, id))
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ApiError::NotFound("record not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ApiError::Conflict(db.message().to_string())
            }
            _ => ApiError::Database(err),
        }
    }
}

impl From<wfm_common::Error> for ApiError {
    fn from(err: wfm_common::Error) -> Self {
        match err {
            wfm_common::Error::Database(e) => e.into(),
            wfm_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            wfm_common::Error::Conflict(msg) => ApiError::Conflict(msg),
            wfm_common::Error::InvalidInput(msg) => ApiError::Unprocessable(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(errors)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(errors) => {
                let body = ValidationErrorResponse {
                    message: "The given data was invalid.".to_string(),
                    errors,
                };
                return (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Database(err) => {
                error!("Database error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
