//! Server-Sent Events
//!
//! Streams the authenticated user's bus events: notifications, record
//! changes and finished conflict checks.

use axum::{extract::State, response::IntoResponse, Extension};
use wfm_common::db::models::User;
use wfm_common::sse::create_user_event_stream;

use crate::AppState;

/// GET /api/events
pub async fn event_stream(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> impl IntoResponse {
    create_user_event_stream(&state.bus, user.id)
}
