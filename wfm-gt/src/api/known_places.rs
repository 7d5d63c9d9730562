//! Known place endpoints
//!
//! Create, update and node sync dispatch a conflict check for the place.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use wfm_common::api::ValidationErrors;
use wfm_common::db::models::{KnownPlace, User};
use wfm_common::events::{RecordChange, RecordType};
use wfm_common::geo::{Coordinate, Geofence};

use super::announce;
use crate::db::places::PlaceInput;
use crate::db::{groups, nodes, places, RuntimeSettings};
use crate::error::{ApiError, ApiResult};
use crate::jobs::conflicts::{self, ConflictReport};
use crate::jobs::Job;
use crate::pagination::{Page, PageQuery};
use crate::validation::{check_known_place, dedup_ids, KnownPlacePayload, NodeSyncPayload};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub group_id: Option<i64>,
}

/// A place with its linked node ids
#[derive(Debug, Serialize)]
pub struct KnownPlaceResponse {
    #[serde(flatten)]
    pub place: KnownPlace,
    pub business_structure_node_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MatchQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PlaceMatch {
    #[serde(flatten)]
    pub place: KnownPlace,
    /// Metres from the place centre
    pub distance: f64,
}

/// GET /api/known-places
pub async fn list_known_places(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<KnownPlace>>> {
    let settings = RuntimeSettings::load(&state.db).await?;
    let total = places::count(&state.db, user.id, query.group_id).await?;
    let page = PageQuery {
        page: query.page,
        per_page: query.per_page,
    };
    let pagination = page.resolve(total, settings.page_size);
    let data = places::list(
        &state.db,
        user.id,
        query.group_id,
        pagination.per_page,
        pagination.offset,
    )
    .await?;
    Ok(Json(Page::new(data, pagination, total)))
}

/// GET /api/known-places/:id
pub async fn get_known_place(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<Json<KnownPlaceResponse>> {
    let place = find_owned(&state, &user, id).await?;
    with_nodes(&state, place).await.map(Json)
}

/// POST /api/known-places
pub async fn create_known_place(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<KnownPlacePayload>,
) -> ApiResult<(StatusCode, Json<KnownPlaceResponse>)> {
    let (input, node_ids) = validate(&state, &user, &payload, None).await?;

    let place = places::insert(&state.db, user.id, &input, node_ids.as_deref()).await?;
    info!("User {} created known place {} ({})", user.id, place.id, place.name);

    announce(&state, user.id, RecordType::KnownPlace, place.id, RecordChange::Created);
    state.jobs.dispatch(Job::CheckKnownPlace { known_place_id: place.id }).await;

    Ok((StatusCode::CREATED, Json(with_nodes(&state, place).await?)))
}

/// PUT /api/known-places/:id
pub async fn update_known_place(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(payload): Json<KnownPlacePayload>,
) -> ApiResult<Json<KnownPlaceResponse>> {
    find_owned(&state, &user, id).await?;
    let (input, node_ids) = validate(&state, &user, &payload, Some(id)).await?;

    let place = places::update(&state.db, user.id, id, &input, node_ids.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("Known place", id))?;

    announce(&state, user.id, RecordType::KnownPlace, id, RecordChange::Updated);
    state.jobs.dispatch(Job::CheckKnownPlace { known_place_id: id }).await;

    with_nodes(&state, place).await.map(Json)
}

/// DELETE /api/known-places/:id
///
/// Places that were in conflict with this one are re-checked.
pub async fn delete_known_place(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let place = find_owned(&state, &user, id).await?;
    let report = conflicts::conflict_report(&state.db, &place).await?;

    if !places::delete(&state.db, user.id, id).await? {
        return Err(ApiError::not_found("Known place", id));
    }
    info!("User {} deleted known place {}", user.id, id);

    announce(&state, user.id, RecordType::KnownPlace, id, RecordChange::Deleted);
    let mut related: Vec<i64> = report
        .descendant_conflicts
        .iter()
        .chain(report.ancestor_conflicts.iter())
        .map(|p| p.id)
        .collect();
    related.sort_unstable();
    related.dedup();
    state.jobs.check_known_places(&related).await;

    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/known-places/:id/nodes
pub async fn sync_known_place_nodes(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(payload): Json<NodeSyncPayload>,
) -> ApiResult<Json<KnownPlaceResponse>> {
    let place = find_owned(&state, &user, id).await?;

    let Some(requested) = payload.business_structure_node_ids else {
        return Err(ApiError::field(
            "business_structure_node_ids",
            "The business structure node ids field is required.",
        ));
    };
    let node_ids = owned_node_ids(&state, &user, &requested).await?;

    places::sync_nodes(&state.db, id, &node_ids).await?;
    announce(&state, user.id, RecordType::KnownPlace, id, RecordChange::Updated);
    state.jobs.dispatch(Job::CheckKnownPlace { known_place_id: id }).await;

    with_nodes(&state, place).await.map(Json)
}

/// GET /api/known-places/:id/conflicts
///
/// Runs the detection synchronously; no notification is created.
pub async fn get_known_place_conflicts(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ConflictReport>> {
    let place = find_owned(&state, &user, id).await?;
    let report = conflicts::conflict_report(&state.db, &place).await?;
    Ok(Json(report))
}

/// GET /api/known-places/match?latitude=&longitude=[&accuracy=]
pub async fn match_known_places(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<MatchQuery>,
) -> ApiResult<Json<Vec<PlaceMatch>>> {
    let point = Coordinate::new(query.latitude, query.longitude);
    if !point.is_valid() {
        return Err(ApiError::BadRequest(
            "latitude must be within ±90 and longitude within ±180".to_string(),
        ));
    }

    let mut matches: Vec<PlaceMatch> = places::list_all(&state.db, user.id)
        .await?
        .into_iter()
        .filter_map(|place| {
            let fence = Geofence {
                center: Coordinate::new(place.latitude, place.longitude),
                radius: place.radius,
                accuracy: place.accuracy,
            };
            fence
                .matches(&point, query.accuracy)
                .map(|distance| PlaceMatch { place, distance })
        })
        .collect();
    matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    Ok(Json(matches))
}

async fn find_owned(state: &AppState, user: &User, id: i64) -> ApiResult<KnownPlace> {
    places::find(&state.db, user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Known place", id))
}

async fn with_nodes(state: &AppState, place: KnownPlace) -> ApiResult<KnownPlaceResponse> {
    let business_structure_node_ids = places::node_ids(&state.db, place.id).await?;
    Ok(KnownPlaceResponse {
        place,
        business_structure_node_ids,
    })
}

/// Node ids the user owns, or a 422 naming the ones they do not
async fn owned_node_ids(state: &AppState, user: &User, requested: &[i64]) -> ApiResult<Vec<i64>> {
    let requested = dedup_ids(requested);
    let owned = nodes::owned_ids(&state.db, user.id, &requested).await?;
    let missing: Vec<String> = requested
        .iter()
        .filter(|id| !owned.contains(id))
        .map(|id| id.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::field(
            "business_structure_node_ids",
            format!("The selected nodes are invalid: {}.", missing.join(", ")),
        ));
    }
    Ok(requested)
}

/// Field validation plus ownership and name uniqueness checks
async fn validate(
    state: &AppState,
    user: &User,
    payload: &KnownPlacePayload,
    existing_id: Option<i64>,
) -> ApiResult<(PlaceInput, Option<Vec<i64>>)> {
    let mut errors = ValidationErrors::new();
    let input = check_known_place(payload, &mut errors);

    if let Some(group_id) = input.group_id {
        if !groups::exists(&state.db, user.id, group_id).await? {
            errors.add("group_id", "The selected group is invalid.");
        }
    }

    if !errors.has("name") {
        if let Some(other) = places::find_by_name(&state.db, user.id, &input.name).await? {
            if Some(other.id) != existing_id {
                errors.add("name", "The name has already been taken.");
            }
        }
    }

    let node_ids = match &payload.business_structure_node_ids {
        Some(requested) => match owned_node_ids(state, user, requested).await {
            Ok(ids) => Some(ids),
            Err(ApiError::Validation(node_errors)) => {
                for field in node_errors.fields() {
                    errors.add(field, "The selected nodes are invalid.");
                }
                None
            }
            Err(e) => return Err(e),
        },
        None => None,
    };

    errors.into_result()?;
    Ok((input, node_ids))
}
