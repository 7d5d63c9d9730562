//! Business structure endpoints
//!
//! Types are attached per user with a color and description. Nodes form a
//! nested-set forest; any structural change re-checks the known places
//! linked above or below the touched nodes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use tracing::info;
use wfm_common::api::ValidationErrors;
use wfm_common::db::models::{BusinessStructureNode, User, UserBusinessStructureType};
use wfm_common::events::{RecordChange, RecordType};
use wfm_common::nested_set::{ancestors_of, build_tree, descendants_of, TreeNode};

use super::announce;
use crate::db::nodes::{self, NewNode, NodeChanges};
use crate::db::{places, types};
use crate::error::{ApiError, ApiResult};
use crate::validation::{
    check_node_name, check_type, check_type_pivot, NodePayload, NodeUpdatePayload, TypePayload,
};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct NodeDetail {
    #[serde(flatten)]
    pub node: BusinessStructureNode,
    pub ancestors: Vec<i64>,
    pub descendants: Vec<i64>,
    pub known_place_ids: Vec<i64>,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// GET /api/business-structure/types
pub async fn list_types(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<Vec<UserBusinessStructureType>>> {
    Ok(Json(types::list_for_user(&state.db, user.id).await?))
}

/// POST /api/business-structure/types
///
/// Attaching a type the user already has is a conflict.
pub async fn attach_type(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<TypePayload>,
) -> ApiResult<(StatusCode, Json<UserBusinessStructureType>)> {
    let mut errors = ValidationErrors::new();
    let (name, color, description) = check_type(&payload, &mut errors);
    errors.into_result()?;

    let attached = types::attach(&state.db, user.id, &name, &color, description.as_deref()).await?;
    info!("User {} attached business structure type {} ({})", user.id, attached.id, name);
    Ok((StatusCode::CREATED, Json(attached)))
}

/// PUT /api/business-structure/types/:id
pub async fn update_type(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(payload): Json<TypePayload>,
) -> ApiResult<Json<UserBusinessStructureType>> {
    let mut errors = ValidationErrors::new();
    let (color, description) = check_type_pivot(&payload, &mut errors);
    errors.into_result()?;

    let updated = types::update_pivot(&state.db, user.id, id, &color, description.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("Business structure type", id))?;
    Ok(Json(updated))
}

/// DELETE /api/business-structure/types/:id
///
/// Nodes of this type keep existing; their type is cleared.
pub async fn detach_type(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !types::detach(&state.db, user.id, id).await? {
        return Err(ApiError::not_found("Business structure type", id));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// GET /api/business-structure/nodes
pub async fn list_nodes(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<Vec<BusinessStructureNode>>> {
    Ok(Json(nodes::list(&state.db, user.id).await?))
}

/// GET /api/business-structure/tree
pub async fn get_tree(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<Vec<TreeNode<BusinessStructureNode>>>> {
    let all = nodes::list(&state.db, user.id).await?;
    Ok(Json(build_tree(all)))
}

/// GET /api/business-structure/nodes/:id
pub async fn get_node(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<Json<NodeDetail>> {
    let all = nodes::list(&state.db, user.id).await?;
    let Some(node) = all.iter().find(|n| n.id == id).cloned() else {
        return Err(ApiError::not_found("Business structure node", id));
    };
    let ancestors = ancestors_of(&all, id).map_err(wfm_common::Error::from)?;
    let descendants = descendants_of(&all, id).map_err(wfm_common::Error::from)?;

    let known_place_ids: Vec<i64> = places::links_for_user(&state.db, user.id)
        .await?
        .into_iter()
        .filter(|link| link.node_id == id)
        .map(|link| link.known_place_id)
        .collect();

    Ok(Json(NodeDetail {
        node,
        ancestors,
        descendants,
        known_place_ids,
    }))
}

/// POST /api/business-structure/nodes
pub async fn create_node(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<NodePayload>,
) -> ApiResult<(StatusCode, Json<BusinessStructureNode>)> {
    let mut errors = ValidationErrors::new();
    let name = check_node_name(payload.name.as_deref(), &mut errors);
    check_parent(&state, &user, payload.parent_id, &mut errors).await?;
    check_type_attached(&state, &user, payload.business_structure_type_id, &mut errors).await?;
    errors.into_result()?;

    let node = nodes::create(
        &state.db,
        user.id,
        &NewNode {
            name,
            parent_id: payload.parent_id,
            type_id: payload.business_structure_type_id,
        },
    )
    .await?;
    info!("User {} created business structure node {} ({})", user.id, node.id, node.path);

    announce(&state, user.id, RecordType::BusinessStructureNode, node.id, RecordChange::Created);

    Ok((StatusCode::CREATED, Json(node)))
}

/// PATCH /api/business-structure/nodes/:id
///
/// `parent_id: null` moves the node to the root level.
pub async fn update_node(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(payload): Json<NodeUpdatePayload>,
) -> ApiResult<Json<BusinessStructureNode>> {
    if nodes::find(&state.db, user.id, id).await?.is_none() {
        return Err(ApiError::not_found("Business structure node", id));
    }

    let mut errors = ValidationErrors::new();
    let name = match payload.name.as_deref() {
        Some(value) => Some(check_node_name(Some(value), &mut errors)),
        None => None,
    };
    if let Some(parent_id) = payload.parent_id {
        check_parent(&state, &user, parent_id, &mut errors).await?;
    }
    if let Some(type_id) = payload.business_structure_type_id {
        check_type_attached(&state, &user, type_id, &mut errors).await?;
    }
    errors.into_result()?;

    let changes = NodeChanges {
        name,
        parent_id: payload.parent_id,
        type_id: payload.business_structure_type_id,
    };
    let change = nodes::update(&state.db, user.id, id, &changes)
        .await?
        .ok_or_else(|| ApiError::not_found("Business structure node", id))?;

    announce(&state, user.id, RecordType::BusinessStructureNode, id, RecordChange::Updated);
    state.jobs.check_known_places(&change.affected_places).await;

    Ok(Json(change.node))
}

/// DELETE /api/business-structure/nodes/:id
///
/// Removes the whole subtree along with its place links.
pub async fn delete_node(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let affected = nodes::delete(&state.db, user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Business structure node", id))?;
    info!("User {} deleted business structure node {}", user.id, id);

    announce(&state, user.id, RecordType::BusinessStructureNode, id, RecordChange::Deleted);
    state.jobs.check_known_places(&affected).await;

    Ok(StatusCode::NO_CONTENT)
}

async fn check_parent(
    state: &AppState,
    user: &User,
    parent_id: Option<i64>,
    errors: &mut ValidationErrors,
) -> ApiResult<()> {
    if let Some(parent_id) = parent_id {
        if nodes::find(&state.db, user.id, parent_id).await?.is_none() {
            errors.add("parent_id", "The selected parent is invalid.");
        }
    }
    Ok(())
}

async fn check_type_attached(
    state: &AppState,
    user: &User,
    type_id: Option<i64>,
    errors: &mut ValidationErrors,
) -> ApiResult<()> {
    if let Some(type_id) = type_id {
        if types::find_for_user(&state.db, user.id, type_id).await?.is_none() {
            errors.add(
                "business_structure_type_id",
                "The selected business structure type is invalid.",
            );
        }
    }
    Ok(())
}
