//! Request payloads and field validation
//!
//! Payload fields are optional at the serde level so that a missing field
//! becomes a per-field "is required" message instead of a parse failure.
//! Ownership checks (groups, nodes, types) need the database and are added by
//! the handlers on top of the errors collected here.

use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use wfm_common::api::ValidationErrors;
use wfm_common::geo::{is_valid_latitude, is_valid_longitude};
use wfm_common::ip_range::{parse_addr, IpAddressRange, IpRangeError};

use crate::db::ip_addresses::IpAddressInput;
use crate::db::nodes::PATH_SEPARATOR;
use crate::db::places::PlaceInput;

pub const MAX_NAME_LENGTH: usize = 255;
pub const MAX_DESCRIPTION_LENGTH: usize = 1000;
pub const MAX_RADIUS_M: f64 = 100_000.0;
pub const MAX_ACCURACY_M: f64 = 10_000.0;

/// Location checks a known place accepts, in the order the client tries them
pub const VALIDATION_METHODS: [&str; 2] = ["gps", "wifi"];

/// Deserialize a field that distinguishes "absent" from "null"
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KnownPlacePayload {
    pub name: Option<String>,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<f64>,
    pub accuracy: Option<f64>,
    pub validation_order: Option<Vec<String>>,
    pub locations: Option<Vec<String>>,
    pub group_id: Option<i64>,
    /// Replaces the linked nodes when present
    pub business_structure_node_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpAddressPayload {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodePayload {
    pub name: Option<String>,
    pub parent_id: Option<i64>,
    pub business_structure_type_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeUpdatePayload {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub business_structure_type_id: Option<Option<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypePayload {
    pub name: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupPayload {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeSyncPayload {
    pub business_structure_node_ids: Option<Vec<i64>>,
}

/// Trimmed, non-empty name of at most [`MAX_NAME_LENGTH`] characters
pub fn check_name(field: &str, value: Option<&str>, errors: &mut ValidationErrors) -> String {
    let name = value.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        errors.add(field, format!("The {} field is required.", field));
    } else if name.chars().count() > MAX_NAME_LENGTH {
        errors.add(
            field,
            format!("The {} may not be greater than {} characters.", field, MAX_NAME_LENGTH),
        );
    }
    name.to_string()
}

fn check_description(value: Option<&str>, errors: &mut ValidationErrors) -> Option<String> {
    let description = value.map(str::trim).filter(|d| !d.is_empty())?;
    if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        errors.add(
            "description",
            format!(
                "The description may not be greater than {} characters.",
                MAX_DESCRIPTION_LENGTH
            ),
        );
    }
    Some(description.to_string())
}

fn required_number(field: &str, value: Option<f64>, errors: &mut ValidationErrors) -> Option<f64> {
    match value {
        Some(v) if v.is_finite() => Some(v),
        Some(_) => {
            errors.add(field, format!("The {} must be a number.", field));
            None
        }
        None => {
            errors.add(field, format!("The {} field is required.", field));
            None
        }
    }
}

/// Validate the intrinsic known place fields
///
/// The returned input is only meaningful when `errors` stays empty.
pub fn check_known_place(payload: &KnownPlacePayload, errors: &mut ValidationErrors) -> PlaceInput {
    let name = check_name("name", payload.name.as_deref(), errors);
    let description = check_description(payload.description.as_deref(), errors);

    let latitude = required_number("latitude", payload.latitude, errors);
    if let Some(lat) = latitude {
        if !is_valid_latitude(lat) {
            errors.add("latitude", "The latitude must be between -90 and 90.");
        }
    }

    let longitude = required_number("longitude", payload.longitude, errors);
    if let Some(lon) = longitude {
        if !is_valid_longitude(lon) {
            errors.add("longitude", "The longitude must be between -180 and 180.");
        }
    }

    let radius = required_number("radius", payload.radius, errors);
    if let Some(r) = radius {
        if r <= 0.0 || r > MAX_RADIUS_M {
            errors.add(
                "radius",
                format!("The radius must be greater than 0 and at most {}.", MAX_RADIUS_M),
            );
        }
    }

    let accuracy = required_number("accuracy", payload.accuracy, errors);
    if let Some(a) = accuracy {
        if !(0.0..=MAX_ACCURACY_M).contains(&a) {
            errors.add(
                "accuracy",
                format!("The accuracy must be between 0 and {}.", MAX_ACCURACY_M),
            );
        }
    }

    let validation_order = check_validation_order(payload.validation_order.as_deref(), errors);

    let locations: Vec<String> = payload
        .locations
        .iter()
        .flatten()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    PlaceInput {
        name,
        description,
        latitude: latitude.unwrap_or_default(),
        longitude: longitude.unwrap_or_default(),
        radius: radius.unwrap_or_default(),
        accuracy: accuracy.unwrap_or_default(),
        validation_order,
        locations,
        group_id: payload.group_id,
    }
}

/// Non-empty list of distinct entries from [`VALIDATION_METHODS`]
///
/// Missing means `["gps"]`. Entries are lower-cased.
pub fn check_validation_order(value: Option<&[String]>, errors: &mut ValidationErrors) -> Vec<String> {
    let Some(entries) = value else {
        return vec!["gps".to_string()];
    };
    if entries.is_empty() {
        errors.add("validation_order", "The validation order must contain at least one method.");
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut order = Vec::with_capacity(entries.len());
    for entry in entries {
        let method = entry.trim().to_lowercase();
        if !VALIDATION_METHODS.contains(&method.as_str()) {
            errors.add(
                "validation_order",
                format!("The validation method '{}' is invalid; use gps or wifi.", entry),
            );
        } else if !seen.insert(method.clone()) {
            errors.add(
                "validation_order",
                format!("The validation method '{}' is listed twice.", method),
            );
        } else {
            order.push(method);
        }
    }
    order
}

/// Validate an IP range payload
///
/// Returns `None` exactly when an error was recorded for `start` or `end`.
pub fn check_ip_address(payload: &IpAddressPayload, errors: &mut ValidationErrors) -> Option<IpAddressInput> {
    let name = check_name("name", payload.name.as_deref(), errors);
    let description = check_description(payload.description.as_deref(), errors);

    let start = check_address("start", payload.start.as_deref(), errors);
    let end = check_address("end", payload.end.as_deref(), errors);
    let (start, end) = (start?, end?);

    match IpAddressRange::from_addrs(start, end) {
        Ok(range) => Some(IpAddressInput {
            name,
            description,
            range,
        }),
        Err(IpRangeError::MixedFamilies { .. }) => {
            errors.add("end", "The end address must use the same IP version as the start address.");
            None
        }
        Err(IpRangeError::StartAfterEnd { .. }) => {
            errors.add("start", "The start address must not be after the end address.");
            None
        }
        Err(e) => {
            errors.add("start", e.to_string());
            None
        }
    }
}

fn check_address(field: &str, value: Option<&str>, errors: &mut ValidationErrors) -> Option<std::net::IpAddr> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        errors.add(field, format!("The {} field is required.", field));
        return None;
    };
    match parse_addr(value) {
        Ok(addr) => Some(addr),
        Err(_) => {
            errors.add(field, format!("The {} must be a valid IP address.", field));
            None
        }
    }
}

/// Node names become path segments and may not contain the separator
pub fn check_node_name(value: Option<&str>, errors: &mut ValidationErrors) -> String {
    let name = check_name("name", value, errors);
    if name.contains(PATH_SEPARATOR) {
        errors.add("name", format!("The name may not contain '{}'.", PATH_SEPARATOR));
    }
    name
}

/// `#RRGGBB`, normalised to lower case
pub fn check_color(value: Option<&str>, errors: &mut ValidationErrors) -> String {
    let color = value.map(str::trim).unwrap_or_default();
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if color.is_empty() {
        errors.add("color", "The color field is required.");
    } else if !valid {
        errors.add("color", "The color must be a hex color like #1a2b3c.");
    }
    color.to_lowercase()
}

pub fn check_type(payload: &TypePayload, errors: &mut ValidationErrors) -> (String, String, Option<String>) {
    let name = check_name("name", payload.name.as_deref(), errors);
    let color = check_color(payload.color.as_deref(), errors);
    let description = check_description(payload.description.as_deref(), errors);
    (name, color, description)
}

pub fn check_type_pivot(payload: &TypePayload, errors: &mut ValidationErrors) -> (String, Option<String>) {
    let color = check_color(payload.color.as_deref(), errors);
    let description = check_description(payload.description.as_deref(), errors);
    (color, description)
}

/// Distinct ids, original order
pub fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
