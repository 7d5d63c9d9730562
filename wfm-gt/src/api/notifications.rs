//! Notification endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use wfm_common::db::models::{Notification, User};

use crate::db::{notifications, RuntimeSettings};
use crate::error::{ApiError, ApiResult};
use crate::pagination::{Page, PageQuery};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    #[serde(default)]
    pub unread: bool,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkedRead {
    pub updated: u64,
}

/// GET /api/notifications[?unread=true]
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<Page<Notification>>> {
    let settings = RuntimeSettings::load(&state.db).await?;
    let total = notifications::count(&state.db, user.id, query.unread).await?;
    let page = PageQuery {
        page: query.page,
        per_page: query.per_page,
    };
    let pagination = page.resolve(total, settings.page_size);
    let data = notifications::list(
        &state.db,
        user.id,
        query.unread,
        pagination.per_page,
        pagination.offset,
    )
    .await?;
    Ok(Json(Page::new(data, pagination, total)))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<UnreadCount>> {
    let unread = notifications::count(&state.db, user.id, true).await?;
    Ok(Json(UnreadCount { unread }))
}

/// POST /api/notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> ApiResult<Json<Notification>> {
    let notification = notifications::mark_read(&state.db, user.id, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Notification", &id))?;
    Ok(Json(notification))
}

/// POST /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<MarkedRead>> {
    let updated = notifications::mark_all_read(&state.db, user.id).await?;
    Ok(Json(MarkedRead { updated }))
}

/// DELETE /api/notifications/:id
pub async fn delete_notification(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !notifications::delete(&state.db, user.id, &id).await? {
        return Err(ApiError::not_found("Notification", &id));
    }
    Ok(StatusCode::NO_CONTENT)
}
