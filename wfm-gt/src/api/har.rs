//! HAR upload endpoints
//!
//! `analyze` only reports what a capture contains. `import` creates the
//! places and IP ranges the user does not have yet, matched by name, and
//! links imported places to existing nodes whose path equals one of the
//! place's locations.

use axum::{body::Bytes, extract::State, Extension, Json};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};
use wfm_common::api::ValidationErrors;
use wfm_common::db::models::User;
use wfm_common::events::{RecordChange, RecordType};

use super::announce;
use crate::db::{ip_addresses, nodes, places};
use crate::error::{ApiError, ApiResult};
use crate::har::{self, HarAnalysis, HarIpAddress, HarKnownPlace};
use crate::jobs::Job;
use crate::validation::{check_ip_address, check_known_place, IpAddressPayload, KnownPlacePayload};
use crate::AppState;

/// Radius given to imported places whose capture carries none
pub const DEFAULT_IMPORT_RADIUS_M: f64 = 100.0;
/// Accuracy given to imported places whose capture carries none
pub const DEFAULT_IMPORT_ACCURACY_M: f64 = 50.0;

#[derive(Debug, Default, Serialize)]
pub struct ImportCounts {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
    pub invalid: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub known_places: ImportCounts,
    pub ip_addresses: ImportCounts,
    /// `name: field: message` lines for invalid or partially linked records
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// POST /api/har/analyze
pub async fn analyze_har(
    Extension(user): Extension<User>,
    body: Bytes,
) -> ApiResult<Json<HarAnalysis>> {
    let analysis = har::analyze(&body).map_err(|e| ApiError::Unprocessable(e.to_string()))?;
    info!(
        "User {} analyzed a HAR capture: {} entries, {} places, {} IP ranges",
        user.id,
        analysis.entries,
        analysis.known_places.len(),
        analysis.ip_addresses.len()
    );
    Ok(Json(analysis))
}

/// POST /api/har/import
pub async fn import_har(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    body: Bytes,
) -> ApiResult<Json<ImportReport>> {
    let analysis = har::analyze(&body).map_err(|e| ApiError::Unprocessable(e.to_string()))?;
    let mut report = ImportReport {
        warnings: analysis.warnings,
        ..Default::default()
    };

    let node_paths: HashMap<String, i64> = nodes::list(&state.db, user.id)
        .await?
        .into_iter()
        .map(|n| (n.path, n.id))
        .collect();

    for candidate in &analysis.known_places {
        if let Err(e) = import_place(&state, &user, candidate, &node_paths, &mut report).await {
            warn!("HAR import of known place '{}' failed: {}", candidate.name, e);
            report.errors.push(format!("{}: {}", candidate.name, e));
            report.known_places.invalid.push(candidate.name.clone());
        }
    }
    for candidate in &analysis.ip_addresses {
        if let Err(e) = import_ip_address(&state, &user, candidate, &mut report).await {
            warn!("HAR import of IP range '{}' failed: {}", candidate.name, e);
            report.errors.push(format!("{}: {}", candidate.name, e));
            report.ip_addresses.invalid.push(candidate.name.clone());
        }
    }

    info!(
        "User {} imported {} places and {} IP ranges from a HAR capture",
        user.id,
        report.known_places.created.len(),
        report.ip_addresses.created.len()
    );
    Ok(Json(report))
}

async fn import_place(
    state: &AppState,
    user: &User,
    candidate: &HarKnownPlace,
    node_paths: &HashMap<String, i64>,
    report: &mut ImportReport,
) -> ApiResult<()> {
    if places::find_by_name(&state.db, user.id, &candidate.name).await?.is_some() {
        report.known_places.skipped.push(candidate.name.clone());
        return Ok(());
    }

    let payload = KnownPlacePayload {
        name: Some(candidate.name.clone()),
        latitude: candidate.latitude,
        longitude: candidate.longitude,
        radius: Some(candidate.radius.unwrap_or(DEFAULT_IMPORT_RADIUS_M)),
        accuracy: Some(candidate.accuracy.unwrap_or(DEFAULT_IMPORT_ACCURACY_M)),
        validation_order: candidate.validation_order.clone(),
        locations: Some(candidate.locations.clone()),
        ..Default::default()
    };
    let mut errors = ValidationErrors::new();
    let input = check_known_place(&payload, &mut errors);
    if !errors.is_empty() {
        report.errors.push(format!("{}: {}", candidate.name, errors));
        report.known_places.invalid.push(candidate.name.clone());
        return Ok(());
    }

    let mut node_ids = Vec::new();
    let mut unlinked = Vec::new();
    for location in &candidate.locations {
        match node_paths.get(location.as_str()) {
            Some(id) if !node_ids.contains(id) => node_ids.push(*id),
            Some(_) => {}
            None => unlinked.push(format!(
                "{}: locations: no business structure node at '{}'",
                candidate.name, location
            )),
        }
    }

    let place = places::insert(&state.db, user.id, &input, Some(node_ids.as_slice())).await?;
    report.errors.extend(unlinked);

    announce(state, user.id, RecordType::KnownPlace, place.id, RecordChange::Created);
    state.jobs.dispatch(Job::CheckKnownPlace { known_place_id: place.id }).await;
    report.known_places.created.push(place.name);
    Ok(())
}

async fn import_ip_address(
    state: &AppState,
    user: &User,
    candidate: &HarIpAddress,
    report: &mut ImportReport,
) -> ApiResult<()> {
    if ip_addresses::find_by_name(&state.db, user.id, &candidate.name).await?.is_some() {
        report.ip_addresses.skipped.push(candidate.name.clone());
        return Ok(());
    }

    let payload = IpAddressPayload {
        name: Some(candidate.name.clone()),
        description: candidate.description.clone(),
        start: candidate.start.clone(),
        end: candidate.end.clone(),
    };
    let mut errors = ValidationErrors::new();
    let Some(input) = check_ip_address(&payload, &mut errors).filter(|_| errors.is_empty()) else {
        report.errors.push(format!("{}: {}", candidate.name, errors));
        report.ip_addresses.invalid.push(candidate.name.clone());
        return Ok(());
    };

    let record = ip_addresses::insert(&state.db, user.id, &input).await?;
    announce(state, user.id, RecordType::KnownIpAddress, record.id, RecordChange::Created);
    state.jobs.dispatch(Job::CheckIpAddress { ip_address_id: record.id }).await;
    report.ip_addresses.created.push(record.name);
    Ok(())
}
