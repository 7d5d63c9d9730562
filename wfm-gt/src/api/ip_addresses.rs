//! Known IP address endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use tracing::info;
use wfm_common::api::ValidationErrors;
use wfm_common::db::models::{KnownIpAddress, User};
use wfm_common::events::{RecordChange, RecordType};
use wfm_common::ip_range::parse_addr;

use super::announce;
use crate::db::ip_addresses::{self, IpAddressInput};
use crate::db::RuntimeSettings;
use crate::error::{ApiError, ApiResult};
use crate::jobs::Job;
use crate::pagination::{Page, PageQuery};
use crate::validation::{check_ip_address, IpAddressPayload};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub ip: String,
}

/// GET /api/known-ip-addresses
pub async fn list_ip_addresses(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<KnownIpAddress>>> {
    let settings = RuntimeSettings::load(&state.db).await?;
    let total = ip_addresses::count(&state.db, user.id).await?;
    let pagination = query.resolve(total, settings.page_size);
    let data = ip_addresses::list(&state.db, user.id, pagination.per_page, pagination.offset).await?;
    Ok(Json(Page::new(data, pagination, total)))
}

/// GET /api/known-ip-addresses/:id
pub async fn get_ip_address(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<Json<KnownIpAddress>> {
    find_owned(&state, &user, id).await.map(Json)
}

/// POST /api/known-ip-addresses
pub async fn create_ip_address(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<IpAddressPayload>,
) -> ApiResult<(StatusCode, Json<KnownIpAddress>)> {
    let input = validate(&state, &user, &payload, None).await?;

    let record = ip_addresses::insert(&state.db, user.id, &input).await?;
    info!("User {} created IP range {} ({})", user.id, record.id, input.range);

    announce(&state, user.id, RecordType::KnownIpAddress, record.id, RecordChange::Created);
    state.jobs.dispatch(Job::CheckIpAddress { ip_address_id: record.id }).await;

    Ok((StatusCode::CREATED, Json(record)))
}

/// PUT /api/known-ip-addresses/:id
pub async fn update_ip_address(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(payload): Json<IpAddressPayload>,
) -> ApiResult<Json<KnownIpAddress>> {
    find_owned(&state, &user, id).await?;
    let input = validate(&state, &user, &payload, Some(id)).await?;

    let record = ip_addresses::update(&state.db, user.id, id, &input)
        .await?
        .ok_or_else(|| ApiError::not_found("Known IP address", id))?;

    announce(&state, user.id, RecordType::KnownIpAddress, id, RecordChange::Updated);
    state.jobs.dispatch(Job::CheckIpAddress { ip_address_id: id }).await;

    Ok(Json(record))
}

/// DELETE /api/known-ip-addresses/:id
pub async fn delete_ip_address(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !ip_addresses::delete(&state.db, user.id, id).await? {
        return Err(ApiError::not_found("Known IP address", id));
    }
    info!("User {} deleted IP range {}", user.id, id);
    announce(&state, user.id, RecordType::KnownIpAddress, id, RecordChange::Deleted);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/known-ip-addresses/lookup?ip=
///
/// Every range of the user containing the address.
pub async fn lookup_ip_address(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<LookupQuery>,
) -> ApiResult<Json<Vec<KnownIpAddress>>> {
    let addr = parse_addr(query.ip.trim()).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let matches = ip_addresses::list_all(&state.db, user.id)
        .await?
        .into_iter()
        .filter(|record| record.range().map(|r| r.contains(addr)).unwrap_or(false))
        .collect();
    Ok(Json(matches))
}

async fn find_owned(state: &AppState, user: &User, id: i64) -> ApiResult<KnownIpAddress> {
    ip_addresses::find(&state.db, user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Known IP address", id))
}

async fn validate(
    state: &AppState,
    user: &User,
    payload: &IpAddressPayload,
    existing_id: Option<i64>,
) -> ApiResult<IpAddressInput> {
    let mut errors = ValidationErrors::new();
    let input = check_ip_address(payload, &mut errors);

    if !errors.has("name") {
        if let Some(name) = payload.name.as_deref().map(str::trim) {
            if let Some(other) = ip_addresses::find_by_name(&state.db, user.id, name).await? {
                if Some(other.id) != existing_id {
                    errors.add("name", "The name has already been taken.");
                }
            }
        }
    }

    errors.into_result()?;
    input.ok_or_else(|| ApiError::Internal("validated IP range missing".to_string()))
}
