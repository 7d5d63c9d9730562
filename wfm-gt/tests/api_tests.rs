//! Integration tests for wfm-gt API endpoints
//!
//! Tests cover:
//! - Health endpoint (no auth required) and bearer authentication
//! - Known place CRUD, validation, ownership and geofence matching
//! - Business structure types and the nested-set node tree
//! - Hierarchy conflict detection and the notifications it produces
//! - Known IP address CRUD, lookup and overlap notifications
//! - Place groups
//! - HAR analysis and import

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::util::ServiceExt; // for `oneshot` method
use wfm_common::api::auth::create_user;
use wfm_common::db::init::{init_database, set_setting};
use wfm_common::events::{EventBus, GeoEvent, NotificationKind};
use wfm_gt::db::notifications;
use wfm_gt::jobs::{self, Job, JobQueue};
use wfm_gt::{build_router, AppState};

/// Test app backed by a fresh database; jobs are run on demand
struct TestApp {
    router: Router,
    pool: SqlitePool,
    bus: EventBus,
    jobs: mpsc::Receiver<Job>,
    _dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("wfm-gt.db")).await.unwrap();
        let bus = EventBus::new(100);
        let (queue, jobs) = JobQueue::channel(100);
        let state = AppState::new(pool.clone(), bus.clone(), queue, 1024 * 1024);

        Self {
            router: build_router(state),
            pool,
            bus,
            jobs,
            _dir: dir,
        }
    }

    async fn user(&self, email: &str) -> String {
        let (_, token) = create_user(&self.pool, "Test User", email).await.unwrap();
        token
    }

    async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, extract_json(response.into_body()).await)
    }

    async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send("GET", uri, Some(token), None).await
    }

    async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", uri, Some(token), Some(body)).await
    }

    /// Run every queued job to completion
    async fn run_jobs(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.jobs.try_recv() {
            jobs::run_job(&self.pool, &self.bus, job).await;
            ran += 1;
        }
        ran
    }

    async fn create_node(&self, token: &str, name: &str, parent_id: Option<i64>) -> i64 {
        let (status, body) = self
            .post(
                "/api/business-structure/nodes",
                token,
                json!({"name": name, "parent_id": parent_id}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_i64().unwrap()
    }

    async fn create_place(&self, token: &str, name: &str, node_ids: &[i64]) -> i64 {
        let (status, body) = self
            .post("/api/known-places", token, place_body(name, node_ids))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_i64().unwrap()
    }
}

/// Test helper: Extract JSON body from response (`Null` when empty)
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

fn place_body(name: &str, node_ids: &[i64]) -> Value {
    json!({
        "name": name,
        "latitude": 52.3702,
        "longitude": 4.8952,
        "radius": 150,
        "accuracy": 20,
        "validation_order": ["gps", "wifi"],
        "business_structure_node_ids": node_ids,
    })
}

// =============================================================================
// Health and Authentication
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let app = TestApp::new().await;

    let (status, body) = app.send("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "wfm-gt");
    assert_eq!(body["database"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_missing_and_invalid_tokens_are_rejected() {
    let app = TestApp::new().await;

    let (status, body) = app.send("GET", "/api/known-places", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app.get("/api/known-places", "wfm_not-a-real-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_identifies_user() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let (status, body) = app.get("/api/me", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ada@example.com");
    assert!(body.get("api_token_hash").is_none());

    // EventSource clients pass the token as a query parameter
    let uri = format!("/api/me?access_token={}", token);
    let (status, body) = app.send("GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ada@example.com");
}

// =============================================================================
// Known Places
// =============================================================================

#[tokio::test]
async fn test_known_place_crud() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let (status, created) = app
        .post("/api/known-places", &token, place_body("Head Office", &[]))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    assert_eq!(created["name"], "Head Office");
    assert_eq!(created["validation_order"], json!(["gps", "wifi"]));
    assert_eq!(created["business_structure_node_ids"], json!([]));
    let id = created["id"].as_i64().unwrap();

    let (status, fetched) = app.get(&format!("/api/known-places/{}", id), &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["radius"], 150.0);

    let mut update = place_body("Head Office Amsterdam", &[]);
    update["radius"] = json!(300);
    let (status, updated) = app
        .send("PUT", &format!("/api/known-places/{}", id), Some(&token), Some(update))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", updated);
    assert_eq!(updated["name"], "Head Office Amsterdam");
    assert_eq!(updated["radius"], 300.0);

    let (status, list) = app.get("/api/known-places", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
    assert_eq!(list["data"][0]["id"], id);

    let (status, _) = app
        .send("DELETE", &format!("/api/known-places/{}", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get(&format!("/api/known-places/{}", id), &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_known_place_validation() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let (status, body) = app.post("/api/known-places", &token, json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "The given data was invalid.");
    for field in ["name", "latitude", "longitude", "radius", "accuracy"] {
        assert!(body["errors"][field].is_array(), "missing error for {}", field);
    }

    let mut bad = place_body("Somewhere", &[]);
    bad["latitude"] = json!(91);
    bad["validation_order"] = json!(["gps", "carrier-pigeon"]);
    let (status, body) = app.post("/api/known-places", &token, bad).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["latitude"].is_array());
    assert!(body["errors"]["validation_order"].is_array());
    assert!(body["errors"].get("name").is_none());

    app.create_place(&token, "Depot", &[]).await;
    let (status, body) = app
        .post("/api/known-places", &token, place_body("Depot", &[]))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["name"].is_array());
}

#[tokio::test]
async fn test_known_places_are_scoped_to_owner() {
    let app = TestApp::new().await;
    let ada = app.user("ada@example.com").await;
    let bob = app.user("bob@example.com").await;

    let place_id = app.create_place(&ada, "Ada's Office", &[]).await;
    let bob_node = app.create_node(&bob, "Bob Corp", None).await;

    let uri = format!("/api/known-places/{}", place_id);
    let (status, _) = app.get(&uri, &bob).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send("PUT", &uri, Some(&bob), Some(place_body("Stolen", &[])))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send("DELETE", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = app.get("/api/known-places", &bob).await;
    assert_eq!(list["total"], 0);

    // Ada cannot link her place to Bob's node
    let (status, body) = app
        .post("/api/known-places", &ada, place_body("Sneaky", &[bob_node]))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["business_structure_node_ids"].is_array());
}

#[tokio::test]
async fn test_known_place_pagination() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;
    for i in 0..5 {
        app.create_place(&token, &format!("Place {}", i), &[]).await;
    }

    let (status, page) = app.get("/api/known-places?page=2&per_page=2", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 5);
    assert_eq!(page["total_pages"], 3);
    assert_eq!(page["page"], 2);
    assert_eq!(page["data"].as_array().unwrap().len(), 2);

    // Past the end clamps to the last page
    let (_, page) = app.get("/api/known-places?page=99&per_page=2", &token).await;
    assert_eq!(page["page"], 3);
    assert_eq!(page["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_match_known_places_by_position() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;
    app.create_place(&token, "Dam Square", &[]).await;

    let (status, matches) = app
        .get("/api/known-places/match?latitude=52.3705&longitude=4.8955", &token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let matches = matches.as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["name"], "Dam Square");
    assert!(matches[0]["distance"].as_f64().unwrap() < 150.0);

    let (_, far) = app
        .get("/api/known-places/match?latitude=48.8566&longitude=2.3522", &token)
        .await;
    assert!(far.as_array().unwrap().is_empty());

    let (status, _) = app
        .get("/api/known-places/match?latitude=123&longitude=0", &token)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_place_and_links_are_saved_together() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;
    let acme = app.create_node(&token, "Acme", None).await;
    let north = app.create_node(&token, "North", Some(acme)).await;
    let hq = app.create_place(&token, "HQ", &[acme]).await;

    // Any failure writing links must roll back the place row as well
    sqlx::query(
        "CREATE TRIGGER fail_links BEFORE INSERT ON business_structure_node_known_place \
         BEGIN SELECT RAISE(ABORT, 'link write failed'); END",
    )
    .execute(&app.pool)
    .await
    .unwrap();

    let (status, _) = app
        .post("/api/known-places", &token, place_body("Depot", &[north]))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let (_, list) = app.get("/api/known-places", &token).await;
    assert_eq!(list["total"], 1);

    let (status, _) = app
        .send(
            "PUT",
            &format!("/api/known-places/{}", hq),
            Some(&token),
            Some(place_body("HQ Renamed", &[north])),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (_, fetched) = app.get(&format!("/api/known-places/{}", hq), &token).await;
    assert_eq!(fetched["name"], "HQ");
    assert_eq!(fetched["business_structure_node_ids"], json!([acme]));
}

// =============================================================================
// Business Structure
// =============================================================================

#[tokio::test]
async fn test_business_structure_types() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let body = json!({"name": "Region", "color": "#1A2B3C", "description": "Sales region"});
    let (status, attached) = app.post("/api/business-structure/types", &token, body.clone()).await;
    assert_eq!(status, StatusCode::CREATED, "{}", attached);
    assert_eq!(attached["color"], "#1a2b3c");
    let type_id = attached["id"].as_i64().unwrap();

    let (status, _) = app.post("/api/business-structure/types", &token, body).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .post("/api/business-structure/types", &token, json!({"name": "Site", "color": "red"}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["color"].is_array());

    let (status, updated) = app
        .send(
            "PUT",
            &format!("/api/business-structure/types/{}", type_id),
            Some(&token),
            Some(json!({"color": "#00ff00"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["color"], "#00ff00");
    assert_eq!(updated["name"], "Region");

    // Another user may attach the same type with their own color
    let bob = app.user("bob@example.com").await;
    let (status, bobs) = app
        .post(
            "/api/business-structure/types",
            &bob,
            json!({"name": "Region", "color": "#ffffff"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(bobs["id"], type_id);

    // Nodes may only use attached types
    let (status, body) = app
        .post(
            "/api/business-structure/nodes",
            &token,
            json!({"name": "North", "business_structure_type_id": type_id + 100}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["business_structure_type_id"].is_array());

    let (status, _) = app
        .send(
            "DELETE",
            &format!("/api/business-structure/types/{}", type_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, types) = app.get("/api/business-structure/types", &token).await;
    assert!(types.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_node_tree_create_move_delete() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let acme = app.create_node(&token, "Acme", None).await;
    let north = app.create_node(&token, "North", Some(acme)).await;
    let site = app.create_node(&token, "Site A", Some(north)).await;
    let south = app.create_node(&token, "South", Some(acme)).await;

    let (status, detail) = app
        .get(&format!("/api/business-structure/nodes/{}", site), &token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["path"], "Acme/North/Site A");
    assert_eq!(detail["ancestors"], json!([acme, north]));

    let (_, tree) = app.get("/api/business-structure/tree", &token).await;
    assert_eq!(tree[0]["name"], "Acme");
    assert_eq!(tree[0]["children"][0]["name"], "North");
    assert_eq!(tree[0]["children"][1]["name"], "South");
    assert_eq!(tree[0]["children"][0]["children"][0]["name"], "Site A");

    // Move North under South; paths follow
    let (status, moved) = app
        .send(
            "PATCH",
            &format!("/api/business-structure/nodes/{}", north),
            Some(&token),
            Some(json!({"parent_id": south})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", moved);
    assert_eq!(moved["path"], "Acme/South/North");

    let (_, detail) = app
        .get(&format!("/api/business-structure/nodes/{}", site), &token)
        .await;
    assert_eq!(detail["path"], "Acme/South/North/Site A");
    assert_eq!(detail["ancestors"], json!([acme, south, north]));

    // A node cannot move below its own descendant
    let (status, _) = app
        .send(
            "PATCH",
            &format!("/api/business-structure/nodes/{}", acme),
            Some(&token),
            Some(json!({"parent_id": site})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Names may not contain the path separator
    let (status, body) = app
        .post("/api/business-structure/nodes", &token, json!({"name": "A/B"}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["name"].is_array());

    // Deleting South removes North and Site A as well
    let (status, _) = app
        .send(
            "DELETE",
            &format!("/api/business-structure/nodes/{}", south),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, nodes) = app.get("/api/business-structure/nodes", &token).await;
    let nodes = nodes.as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["id"], acme);
    assert_eq!(nodes[0]["lft"], 1);
    assert_eq!(nodes[0]["rgt"], 2);
}

#[tokio::test]
async fn test_node_parent_must_be_owned() {
    let app = TestApp::new().await;
    let ada = app.user("ada@example.com").await;
    let bob = app.user("bob@example.com").await;
    let bob_root = app.create_node(&bob, "Bob Corp", None).await;

    let (status, body) = app
        .post(
            "/api/business-structure/nodes",
            &ada,
            json!({"name": "Intruder", "parent_id": bob_root}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["parent_id"].is_array());

    let (status, _) = app
        .get(&format!("/api/business-structure/nodes/{}", bob_root), &ada)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Conflicts and Notifications
// =============================================================================

#[tokio::test]
async fn test_conflicts_endpoint_reports_both_directions() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let acme = app.create_node(&token, "Acme", None).await;
    let north = app.create_node(&token, "North", Some(acme)).await;
    let site = app.create_node(&token, "Site A", Some(north)).await;

    let hq = app.create_place(&token, "HQ", &[acme]).await;
    let regional = app.create_place(&token, "Regional", &[north]).await;
    let shop = app.create_place(&token, "Shop", &[site]).await;
    let twin = app.create_place(&token, "Twin", &[north]).await;

    let (status, report) = app
        .get(&format!("/api/known-places/{}/conflicts", regional), &token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["known_place_id"], regional);
    assert_eq!(report["ancestor_conflicts"][0]["id"], hq);
    assert_eq!(report["ancestor_conflicts"][0]["node_ids"], json!([acme]));
    assert_eq!(report["descendant_conflicts"][0]["id"], shop);

    // Sharing the exact node is not a conflict
    let ids: Vec<i64> = report["ancestor_conflicts"]
        .as_array()
        .unwrap()
        .iter()
        .chain(report["descendant_conflicts"].as_array().unwrap())
        .map(|p| p["id"].as_i64().unwrap())
        .collect();
    assert!(!ids.contains(&twin));
}

#[tokio::test]
async fn test_conflict_job_creates_notifications() {
    let mut app = TestApp::new().await;
    let token = app.user("ada@example.com").await;
    let mut events = app.bus.subscribe();

    let acme = app.create_node(&token, "Acme", None).await;
    let north = app.create_node(&token, "North", Some(acme)).await;
    app.create_place(&token, "HQ", &[acme]).await;
    app.create_place(&token, "Depot", &[north]).await;

    assert_eq!(app.run_jobs().await, 2);

    let (status, list) = app.get("/api/notifications", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 2);
    let first = &list["data"][0];
    assert_eq!(first["kind"], "known_place_conflict");
    assert!(first["read_at"].is_null());
    assert!(first["data"]["message"].as_str().unwrap().contains("Known place"));

    let mut saw_notification = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, GeoEvent::NotificationCreated { .. }) {
            saw_notification = true;
        }
    }
    assert!(saw_notification);

    let (_, count) = app.get("/api/notifications/unread-count", &token).await;
    assert_eq!(count["unread"], 2);

    let id = first["id"].as_str().unwrap().to_string();
    let (status, read) = app
        .post(&format!("/api/notifications/{}/read", id), &token, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(read["read_at"].is_string());

    let (_, unread) = app.get("/api/notifications?unread=true", &token).await;
    assert_eq!(unread["total"], 1);

    let (_, marked) = app.post("/api/notifications/read-all", &token, json!({})).await;
    assert_eq!(marked["updated"], 1);

    let (status, _) = app
        .send("DELETE", &format!("/api/notifications/{}", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Other users cannot see or touch these notifications
    let bob = app.user("bob@example.com").await;
    let (_, bobs) = app.get("/api/notifications", &bob).await;
    assert_eq!(bobs["total"], 0);
}

#[tokio::test]
async fn test_conflict_checks_can_be_disabled() {
    let mut app = TestApp::new().await;
    let token = app.user("ada@example.com").await;
    set_setting(&app.pool, "known_place_conflict_check_enabled", "false")
        .await
        .unwrap();

    let acme = app.create_node(&token, "Acme", None).await;
    let north = app.create_node(&token, "North", Some(acme)).await;
    app.create_place(&token, "HQ", &[acme]).await;
    app.create_place(&token, "Depot", &[north]).await;
    app.run_jobs().await;

    let (_, list) = app.get("/api/notifications", &token).await;
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn test_moving_a_node_rechecks_linked_places() {
    let mut app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let acme = app.create_node(&token, "Acme", None).await;
    let other = app.create_node(&token, "Other", None).await;
    app.create_place(&token, "HQ", &[acme]).await;
    app.create_place(&token, "Depot", &[other]).await;
    app.run_jobs().await;

    let (_, list) = app.get("/api/notifications", &token).await;
    assert_eq!(list["total"], 0);

    let (status, _) = app
        .send(
            "PATCH",
            &format!("/api/business-structure/nodes/{}", other),
            Some(&token),
            Some(json!({"parent_id": acme})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.run_jobs().await >= 2);

    let (_, list) = app.get("/api/notifications", &token).await;
    assert_eq!(list["total"], 2);
}

#[tokio::test]
async fn test_conflict_job_skips_deleted_places() {
    let mut app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let acme = app.create_node(&token, "Acme", None).await;
    let north = app.create_node(&token, "North", Some(acme)).await;
    app.create_place(&token, "HQ", &[acme]).await;
    let depot = app.create_place(&token, "Depot", &[north]).await;

    // Depot is gone before its queued check runs; HQ is re-checked on delete
    let (status, _) = app
        .send("DELETE", &format!("/api/known-places/{}", depot), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.run_jobs().await, 3);

    jobs::run_job(&app.pool, &app.bus, Job::CheckKnownPlace { known_place_id: 9999 }).await;

    let (_, list) = app.get("/api/notifications", &token).await;
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn test_deleting_a_node_clears_conflicts() {
    let mut app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let acme = app.create_node(&token, "Acme", None).await;
    let north = app.create_node(&token, "North", Some(acme)).await;
    let hq = app.create_place(&token, "HQ", &[acme]).await;
    let depot = app.create_place(&token, "Depot", &[north]).await;
    app.run_jobs().await;

    let (_, list) = app.get("/api/notifications", &token).await;
    assert_eq!(list["total"], 2);

    let (status, _) = app
        .send(
            "DELETE",
            &format!("/api/business-structure/nodes/{}", north),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Depot lost its only node; both places are re-checked
    assert_eq!(app.run_jobs().await, 2);
    let (_, list) = app.get("/api/notifications", &token).await;
    assert_eq!(list["total"], 2);

    let (_, depot_place) = app.get(&format!("/api/known-places/{}", depot), &token).await;
    assert_eq!(depot_place["business_structure_node_ids"], json!([]));

    let (_, report) = app
        .get(&format!("/api/known-places/{}/conflicts", hq), &token)
        .await;
    assert_eq!(report["descendant_conflicts"], json!([]));
    assert_eq!(report["ancestor_conflicts"], json!([]));
}

#[tokio::test]
async fn test_prune_keeps_notifications_when_retention_is_zero() {
    let app = TestApp::new().await;
    app.user("ada@example.com").await;
    let user_id: i64 = sqlx::query_scalar("SELECT id FROM users WHERE email = 'ada@example.com'")
        .fetch_one(&app.pool)
        .await
        .unwrap();

    let old = notifications::insert(&app.pool, user_id, NotificationKind::KnownPlaceConflict, json!({}))
        .await
        .unwrap();
    notifications::mark_read(&app.pool, user_id, &old.id).await.unwrap();
    sqlx::query("UPDATE notifications SET created_at = ? WHERE id = ?")
        .bind(chrono::Utc::now() - chrono::Duration::days(400))
        .bind(&old.id)
        .execute(&app.pool)
        .await
        .unwrap();

    assert_eq!(notifications::prune_read(&app.pool, 0).await.unwrap(), 0);
    assert_eq!(notifications::prune_read(&app.pool, -5).await.unwrap(), 0);
    assert!(notifications::find(&app.pool, user_id, &old.id).await.unwrap().is_some());

    // Unread rows survive any retention
    let unread = notifications::insert(&app.pool, user_id, NotificationKind::IpRangeOverlap, json!({}))
        .await
        .unwrap();
    assert_eq!(notifications::prune_read(&app.pool, 30).await.unwrap(), 1);
    assert!(notifications::find(&app.pool, user_id, &old.id).await.unwrap().is_none());
    assert!(notifications::find(&app.pool, user_id, &unread.id).await.unwrap().is_some());
}

// =============================================================================
// Known IP Addresses
// =============================================================================

#[tokio::test]
async fn test_ip_address_crud_and_lookup() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let (status, created) = app
        .post(
            "/api/known-ip-addresses",
            &token,
            json!({"name": "Office LAN", "start": "10.0.0.0", "end": "10.0.0.255"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    assert_eq!(created["start"], "10.0.0.0");
    let id = created["id"].as_i64().unwrap();

    let (status, found) = app
        .get("/api/known-ip-addresses/lookup?ip=10.0.0.42", &token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found[0]["id"], id);

    let (_, found) = app
        .get("/api/known-ip-addresses/lookup?ip=192.168.1.1", &token)
        .await;
    assert!(found.as_array().unwrap().is_empty());

    let (status, _) = app
        .get("/api/known-ip-addresses/lookup?ip=not-an-ip", &token)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, updated) = app
        .send(
            "PUT",
            &format!("/api/known-ip-addresses/{}", id),
            Some(&token),
            Some(json!({"name": "Office LAN", "start": "10.0.0.0", "end": "10.0.1.255"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["end"], "10.0.1.255");

    let (status, _) = app
        .send("DELETE", &format!("/api/known-ip-addresses/{}", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, list) = app.get("/api/known-ip-addresses", &token).await;
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn test_ip_address_validation() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let (status, body) = app
        .post(
            "/api/known-ip-addresses",
            &token,
            json!({"name": "Backwards", "start": "10.0.0.9", "end": "10.0.0.1"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["start"].is_array());

    let (status, body) = app
        .post(
            "/api/known-ip-addresses",
            &token,
            json!({"name": "Mixed", "start": "10.0.0.1", "end": "::1"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["end"].is_array());

    let (status, body) = app
        .post("/api/known-ip-addresses", &token, json!({"start": "bogus"}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["name"].is_array());
    assert!(body["errors"]["start"].is_array());
    assert!(body["errors"]["end"].is_array());
}

#[tokio::test]
async fn test_overlapping_ranges_notify() {
    let mut app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    app.post(
        "/api/known-ip-addresses",
        &token,
        json!({"name": "LAN", "start": "10.0.0.0", "end": "10.0.0.255"}),
    )
    .await;
    app.post(
        "/api/known-ip-addresses",
        &token,
        json!({"name": "VPN", "start": "10.0.0.128", "end": "10.0.1.0"}),
    )
    .await;
    app.post(
        "/api/known-ip-addresses",
        &token,
        json!({"name": "IPv6", "start": "fd00::1", "end": "fd00::ff"}),
    )
    .await;
    assert_eq!(app.run_jobs().await, 3);

    let (_, list) = app.get("/api/notifications", &token).await;
    assert_eq!(list["total"], 2);
    assert_eq!(list["data"][0]["kind"], "ip_range_overlap");
}

// =============================================================================
// Groups
// =============================================================================

#[tokio::test]
async fn test_groups() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let (status, group) = app.post("/api/groups", &token, json!({"name": "Warehouses"})).await;
    assert_eq!(status, StatusCode::CREATED);
    let group_id = group["id"].as_i64().unwrap();

    let (status, _) = app.post("/api/groups", &token, json!({"name": "Warehouses"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let mut body = place_body("North Warehouse", &[]);
    body["group_id"] = json!(group_id);
    let (status, place) = app.post("/api/known-places", &token, body).await;
    assert_eq!(status, StatusCode::CREATED);
    let place_id = place["id"].as_i64().unwrap();

    let mut bad = place_body("Nowhere", &[]);
    bad["group_id"] = json!(group_id + 100);
    let (status, errors) = app.post("/api/known-places", &token, bad).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(errors["errors"]["group_id"].is_array());

    let (_, shown) = app.get(&format!("/api/groups/{}", group_id), &token).await;
    assert_eq!(shown["name"], "Warehouses");
    assert_eq!(shown["known_places"][0]["id"], place_id);

    let (_, filtered) = app
        .get(&format!("/api/known-places?group_id={}", group_id), &token)
        .await;
    assert_eq!(filtered["total"], 1);

    let (status, _) = app
        .send("DELETE", &format!("/api/groups/{}", group_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, place) = app.get(&format!("/api/known-places/{}", place_id), &token).await;
    assert!(place["group_id"].is_null());
}

// =============================================================================
// HAR
// =============================================================================

fn har_capture() -> Value {
    let places = json!({"data": [
        {"name": "HQ", "latitude": 52.37, "longitude": 4.89, "radius": 200,
         "locations": ["Acme"]},
        {"name": "No Coordinates", "radius": 50}
    ]});
    let ranges = json!([{"name": "LAN", "start": "10.0.0.1", "end": "10.0.0.99"}]);
    json!({"log": {"version": "1.2", "entries": [
        {"request": {"method": "GET", "url": "https://wfm.example.com/api/known_places"},
         "response": {"status": 200, "content": {"text": places.to_string()}}},
        {"request": {"method": "GET", "url": "https://wfm.example.com/api/known_ip_addresses"},
         "response": {"status": 200, "content": {"text": ranges.to_string()}}}
    ]}})
}

#[tokio::test]
async fn test_har_analyze() {
    let app = TestApp::new().await;
    let token = app.user("ada@example.com").await;

    let (status, analysis) = app.post("/api/har/analyze", &token, har_capture()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(analysis["entries"], 2);
    assert_eq!(analysis["hosts"], json!(["wfm.example.com"]));
    assert_eq!(analysis["known_places"].as_array().unwrap().len(), 2);
    assert_eq!(analysis["ip_addresses"][0]["name"], "LAN");

    let (status, _) = app.post("/api/har/analyze", &token, json!({"not": "har"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_har_import() {
    let mut app = TestApp::new().await;
    let token = app.user("ada@example.com").await;
    let acme = app.create_node(&token, "Acme", None).await;

    let (status, report) = app.post("/api/har/import", &token, har_capture()).await;
    assert_eq!(status, StatusCode::OK, "{}", report);
    assert_eq!(report["known_places"]["created"], json!(["HQ"]));
    assert_eq!(report["known_places"]["invalid"], json!(["No Coordinates"]));
    assert_eq!(report["ip_addresses"]["created"], json!(["LAN"]));
    assert!(app.run_jobs().await >= 2);

    let (_, places) = app.get("/api/known-places", &token).await;
    let hq_id = places["data"][0]["id"].as_i64().unwrap();
    let (_, hq) = app.get(&format!("/api/known-places/{}", hq_id), &token).await;
    assert_eq!(hq["business_structure_node_ids"], json!([acme]));
    assert_eq!(hq["validation_order"], json!(["gps"]));

    // A second import skips what already exists
    let (_, again) = app.post("/api/har/import", &token, har_capture()).await;
    assert_eq!(again["known_places"]["skipped"], json!(["HQ"]));
    assert_eq!(again["ip_addresses"]["skipped"], json!(["LAN"]));
}

#[tokio::test]
async fn test_har_import_reports_database_failures_per_record() {
    let mut app = TestApp::new().await;
    let token = app.user("ada@example.com").await;
    sqlx::query(
        "CREATE TRIGGER reject_broken BEFORE INSERT ON known_places \
         WHEN NEW.name = 'Broken' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(&app.pool)
    .await
    .unwrap();

    let places = json!([
        {"name": "Broken", "latitude": 1.0, "longitude": 1.0},
        {"name": "Fine", "latitude": 2.0, "longitude": 2.0}
    ]);
    let capture = json!({"log": {"entries": [
        {"request": {"url": "https://wfm.example.com/api/known_places"},
         "response": {"status": 200, "content": {"text": places.to_string()}}}
    ]}});

    let (status, report) = app.post("/api/har/import", &token, capture).await;
    assert_eq!(status, StatusCode::OK, "{}", report);
    assert_eq!(report["known_places"]["created"], json!(["Fine"]));
    assert_eq!(report["known_places"]["invalid"], json!(["Broken"]));
    assert!(report["errors"][0].as_str().unwrap().starts_with("Broken:"));
    assert_eq!(app.run_jobs().await, 1);

    let (_, list) = app.get("/api/known-places", &token).await;
    assert_eq!(list["total"], 1);
}
