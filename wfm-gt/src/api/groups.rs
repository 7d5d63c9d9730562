//! Place group endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use wfm_common::api::ValidationErrors;
use wfm_common::db::models::{KnownPlace, PlaceGroup, User};
use wfm_common::events::{RecordChange, RecordType};

use super::announce;
use crate::db::{groups, places};
use crate::error::{ApiError, ApiResult};
use crate::validation::{check_name, GroupPayload};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    #[serde(flatten)]
    pub group: PlaceGroup,
    pub known_places: Vec<KnownPlace>,
}

/// GET /api/groups
pub async fn list_groups(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<Vec<PlaceGroup>>> {
    Ok(Json(groups::list(&state.db, user.id).await?))
}

/// GET /api/groups/:id
pub async fn get_group(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<Json<GroupResponse>> {
    let group = groups::find(&state.db, user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Group", id))?;
    let known_places = places::list_for_group(&state.db, user.id, id).await?;
    Ok(Json(GroupResponse { group, known_places }))
}

/// POST /api/groups
pub async fn create_group(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<GroupPayload>,
) -> ApiResult<(StatusCode, Json<PlaceGroup>)> {
    let name = validate(&payload)?;
    let group = groups::insert(&state.db, user.id, &name).await?;
    announce(&state, user.id, RecordType::Group, group.id, RecordChange::Created);
    Ok((StatusCode::CREATED, Json(group)))
}

/// PUT /api/groups/:id
pub async fn update_group(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(payload): Json<GroupPayload>,
) -> ApiResult<Json<PlaceGroup>> {
    let name = validate(&payload)?;
    let group = groups::rename(&state.db, user.id, id, &name)
        .await?
        .ok_or_else(|| ApiError::not_found("Group", id))?;
    announce(&state, user.id, RecordType::Group, id, RecordChange::Updated);
    Ok(Json(group))
}

/// DELETE /api/groups/:id
///
/// Member places stay and lose their group.
pub async fn delete_group(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !groups::delete(&state.db, user.id, id).await? {
        return Err(ApiError::not_found("Group", id));
    }
    announce(&state, user.id, RecordType::Group, id, RecordChange::Deleted);
    Ok(StatusCode::NO_CONTENT)
}

fn validate(payload: &GroupPayload) -> ApiResult<String> {
    let mut errors = ValidationErrors::new();
    let name = check_name("name", payload.name.as_deref(), &mut errors);
    errors.into_result()?;
    Ok(name)
}
