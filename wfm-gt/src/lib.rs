//! wfm-gt library - WFM Geo Toolkit service
//!
//! Known places with geofences, known IP ranges and a per-user business
//! structure tree, plus background checks that notify users when places
//! conflict across the hierarchy or IP ranges overlap.

use axum::extract::DefaultBodyLimit;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use wfm_common::events::EventBus;

pub mod api;
pub mod db;
pub mod error;
pub mod har;
pub mod jobs;
pub mod pagination;
pub mod validation;

use jobs::JobQueue;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Broadcasts record changes and notifications to SSE clients
    pub bus: EventBus,
    /// Feeds the background job worker
    pub jobs: JobQueue,
    /// Body limit for HAR uploads
    pub har_max_upload_bytes: usize,
}

impl AppState {
    pub fn new(db: SqlitePool, bus: EventBus, jobs: JobQueue, har_max_upload_bytes: usize) -> Self {
        Self {
            db,
            bus,
            jobs,
            har_max_upload_bytes,
        }
    }
}

/// Build application router
///
/// Everything under `/api` requires a bearer token; `/health` does not.
pub fn build_router(state: AppState) -> Router {
    use crate::api::{business_structure as bs, groups, har, ip_addresses, known_places, notifications};
    use axum::middleware;
    use axum::routing::{get, post, put};

    let har_routes = Router::new()
        .route("/api/har/analyze", post(har::analyze_har))
        .route("/api/har/import", post(har::import_har))
        .layer(DefaultBodyLimit::max(state.har_max_upload_bytes));

    // Protected routes (require authentication)
    let protected = Router::new()
        .route("/api/me", get(api::me))
        .route("/api/events", get(api::event_stream))
        .route(
            "/api/known-places",
            get(known_places::list_known_places).post(known_places::create_known_place),
        )
        .route("/api/known-places/match", get(known_places::match_known_places))
        .route(
            "/api/known-places/:id",
            get(known_places::get_known_place)
                .put(known_places::update_known_place)
                .delete(known_places::delete_known_place),
        )
        .route("/api/known-places/:id/nodes", put(known_places::sync_known_place_nodes))
        .route(
            "/api/known-places/:id/conflicts",
            get(known_places::get_known_place_conflicts),
        )
        .route(
            "/api/known-ip-addresses",
            get(ip_addresses::list_ip_addresses).post(ip_addresses::create_ip_address),
        )
        .route("/api/known-ip-addresses/lookup", get(ip_addresses::lookup_ip_address))
        .route(
            "/api/known-ip-addresses/:id",
            get(ip_addresses::get_ip_address)
                .put(ip_addresses::update_ip_address)
                .delete(ip_addresses::delete_ip_address),
        )
        .route("/api/groups", get(groups::list_groups).post(groups::create_group))
        .route(
            "/api/groups/:id",
            get(groups::get_group)
                .put(groups::update_group)
                .delete(groups::delete_group),
        )
        .route(
            "/api/business-structure/types",
            get(bs::list_types).post(bs::attach_type),
        )
        .route(
            "/api/business-structure/types/:id",
            put(bs::update_type).delete(bs::detach_type),
        )
        .route("/api/business-structure/tree", get(bs::get_tree))
        .route(
            "/api/business-structure/nodes",
            get(bs::list_nodes).post(bs::create_node),
        )
        .route(
            "/api/business-structure/nodes/:id",
            get(bs::get_node).patch(bs::update_node).delete(bs::delete_node),
        )
        .route("/api/notifications", get(notifications::list_notifications))
        .route("/api/notifications/unread-count", get(notifications::unread_count))
        .route("/api/notifications/read-all", post(notifications::mark_all_read))
        .route(
            "/api/notifications/:id",
            axum::routing::delete(notifications::delete_notification),
        )
        .route("/api/notifications/:id/read", post(notifications::mark_read))
        .merge(har_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    // Public routes (no authentication)
    let public = Router::new().merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
