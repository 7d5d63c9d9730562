//! Shared HTTP API functionality
//!
//! Token authentication and the request/response types every handler uses.
//! Nothing here depends on axum; the service wraps these in middleware and
//! `IntoResponse` impls.

pub mod auth;
pub mod types;

pub use auth::{generate_token, hash_token, parse_bearer, ApiAuthError};
pub use types::{ErrorResponse, ValidationErrorResponse, ValidationErrors};
