//! Authentication middleware
//!
//! Resolves `Authorization: Bearer <token>` to a user and stores it in the
//! request extensions. Browsers cannot set headers on `EventSource`, so an
//! `access_token` query parameter is accepted as well.
//!
//! Applied to protected routes only; `/health` stays public.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
    Extension, Json,
};
use tracing::{debug, warn};
use wfm_common::api::auth::{authenticate, parse_bearer, ApiAuthError};
use wfm_common::db::models::User;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = match request.headers().get(AUTHORIZATION) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| ApiError::Unauthorized(ApiAuthError::MissingToken.to_string()))?;
            parse_bearer(value)
                .map_err(|e| ApiError::Unauthorized(e.to_string()))?
                .to_string()
        }
        None => query_token(request.uri().query())
            .ok_or_else(|| ApiError::Unauthorized(ApiAuthError::MissingToken.to_string()))?,
    };

    let user = authenticate(&state.db, &token).await.map_err(|e| match e {
        ApiAuthError::DatabaseError(msg) => ApiError::Internal(msg),
        other => {
            warn!("Rejected request to {}: {}", request.uri().path(), other);
            ApiError::Unauthorized(other.to_string())
        }
    })?;

    debug!("Authenticated user {} for {}", user.id, request.uri().path());
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn query_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "access_token")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// GET /api/me
pub async fn me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}
