//! HAR capture analysis
//!
//! Reads a browser HTTP Archive recorded against the WFM web client and pulls
//! out the known places and known IP addresses the client received. Response
//! bodies may be a bare JSON array or an object wrapping the array in `data`.
//!
//! Base64-encoded bodies are decoded before parsing.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;
use tracing::warn;
use url::Url;

const KNOWN_PLACES_SUFFIX: &str = "known_places";
const KNOWN_IP_ADDRESSES_SUFFIX: &str = "known_ip_addresses";

#[derive(Debug, Error)]
pub enum HarError {
    #[error("not a HAR document: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct HarDocument {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
struct HarEntry {
    request: HarRequest,
    response: HarResponse,
}

#[derive(Debug, Deserialize)]
struct HarRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct HarResponse {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    content: HarContent,
}

#[derive(Debug, Default, Deserialize)]
struct HarContent {
    text: Option<String>,
    encoding: Option<String>,
}

/// Known place found in a captured response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarKnownPlace {
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<f64>,
    pub accuracy: Option<f64>,
    pub validation_order: Option<Vec<String>>,
    pub locations: Vec<String>,
}

/// IP range found in a captured response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarIpAddress {
    pub name: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HarAnalysis {
    pub entries: usize,
    pub hosts: Vec<String>,
    /// Response count per HTTP status code
    pub statuses: BTreeMap<String, usize>,
    pub known_places: Vec<HarKnownPlace>,
    pub ip_addresses: Vec<HarIpAddress>,
    pub warnings: Vec<String>,
}

/// Analyze a raw HAR document
pub fn analyze(bytes: &[u8]) -> Result<HarAnalysis, HarError> {
    let document: HarDocument =
        serde_json::from_slice(bytes).map_err(|e| HarError::Malformed(e.to_string()))?;

    let mut analysis = HarAnalysis {
        entries: document.log.entries.len(),
        ..Default::default()
    };
    let mut hosts = BTreeSet::new();
    let mut place_names = HashSet::new();
    let mut ip_names = HashSet::new();

    for (index, entry) in document.log.entries.iter().enumerate() {
        *analysis
            .statuses
            .entry(entry.response.status.to_string())
            .or_default() += 1;

        let url = match Url::parse(&entry.request.url) {
            Ok(url) => url,
            Err(e) => {
                warn!("HAR entry {} has an unparsable URL '{}': {}", index, entry.request.url, e);
                analysis
                    .warnings
                    .push(format!("entry {}: unparsable URL skipped", index));
                continue;
            }
        };
        if let Some(host) = host_of(&url) {
            hosts.insert(host);
        }

        let path = url.path().trim_end_matches('/');
        let kind = if path.ends_with(KNOWN_PLACES_SUFFIX) {
            KNOWN_PLACES_SUFFIX
        } else if path.ends_with(KNOWN_IP_ADDRESSES_SUFFIX) {
            KNOWN_IP_ADDRESSES_SUFFIX
        } else {
            continue;
        };

        let Some(text) = entry.response.content.text.as_deref() else {
            continue;
        };
        let decoded;
        let text = if entry.response.content.encoding.as_deref() == Some("base64") {
            match general_purpose::STANDARD
                .decode(text.trim())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
            {
                Some(plain) => {
                    decoded = plain;
                    decoded.as_str()
                }
                None => {
                    analysis
                        .warnings
                        .push(format!("entry {}: base64 body could not be decoded", index));
                    continue;
                }
            }
        } else {
            text
        };
        let body: Value = match serde_json::from_str(text) {
            Ok(body) => body,
            Err(_) => {
                analysis
                    .warnings
                    .push(format!("entry {}: response body is not JSON", index));
                continue;
            }
        };

        for record in records(&body) {
            if kind == KNOWN_PLACES_SUFFIX {
                match place_from(record) {
                    Some(place) if place_names.insert(place.name.clone()) => {
                        analysis.known_places.push(place)
                    }
                    Some(_) => {}
                    None => analysis
                        .warnings
                        .push(format!("entry {}: known place without a name skipped", index)),
                }
            } else {
                match ip_from(record) {
                    Some(ip) if ip_names.insert(ip.name.clone()) => analysis.ip_addresses.push(ip),
                    Some(_) => {}
                    None => analysis
                        .warnings
                        .push(format!("entry {}: IP address without a name skipped", index)),
                }
            }
        }
    }

    analysis.hosts = hosts.into_iter().collect();
    Ok(analysis)
}

/// `host[:port]`, the port only when it is not the scheme default
fn host_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn records(body: &Value) -> Vec<&Value> {
    match body {
        Value::Array(items) => items.iter().filter(|v| v.is_object()).collect(),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => items.iter().filter(|v| v.is_object()).collect(),
            Some(single @ Value::Object(_)) => vec![single],
            _ => vec![body],
        },
        _ => Vec::new(),
    }
}

fn string_field(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
}

fn number_field(record: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
}

fn place_from(record: &Value) -> Option<HarKnownPlace> {
    let name = string_field(record, &["name", "title"])?;

    let validation_order = match record.get("validation_order") {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        Some(Value::String(s)) => Some(
            s.split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
        ),
        _ => None,
    };

    let locations = match record.get("locations") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(_) => string_field(item, &["path", "name"]),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    Some(HarKnownPlace {
        name,
        latitude: number_field(record, &["latitude", "lat"]),
        longitude: number_field(record, &["longitude", "lng", "lon"]),
        radius: number_field(record, &["radius"]),
        accuracy: number_field(record, &["accuracy"]),
        validation_order,
        locations,
    })
}

fn ip_from(record: &Value) -> Option<HarIpAddress> {
    Some(HarIpAddress {
        name: string_field(record, &["name"])?,
        start: string_field(record, &["start", "start_address", "start_ip"]),
        end: string_field(record, &["end", "end_address", "end_ip"]),
        description: string_field(record, &["description"]),
    })
}
