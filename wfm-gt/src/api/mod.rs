//! HTTP API handlers for wfm-gt

pub mod auth;
pub mod business_structure;
pub mod groups;
pub mod har;
pub mod health;
pub mod ip_addresses;
pub mod known_places;
pub mod notifications;
pub mod sse;

pub use auth::{auth_middleware, me};
pub use health::health_routes;
pub use sse::event_stream;

use chrono::Utc;
use wfm_common::events::{GeoEvent, RecordChange, RecordType};

use crate::AppState;

/// Broadcast a record change to the owner's SSE clients
pub(crate) fn announce(
    state: &AppState,
    user_id: i64,
    record: RecordType,
    record_id: i64,
    change: RecordChange,
) {
    state.bus.emit_lossy(GeoEvent::RecordChanged {
        user_id,
        record,
        record_id,
        change,
        timestamp: Utc::now(),
    });
}
