//! Database models

use crate::ip_range::{IpAddressRange, IpRangeError};
use crate::nested_set::NestedNode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub api_token_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A business structure type as seen by one user (type row + pivot data)
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserBusinessStructureType {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BusinessStructureNode {
    pub id: i64,
    pub user_id: i64,
    pub business_structure_type_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub name: String,
    pub path: String,
    pub lft: i64,
    pub rgt: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NestedNode for BusinessStructureNode {
    fn id(&self) -> i64 {
        self.id
    }
    fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }
    fn lft(&self) -> i64 {
        self.lft
    }
    fn rgt(&self) -> i64 {
        self.rgt
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct KnownPlace {
    pub id: i64,
    pub user_id: i64,
    pub group_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Geofence radius in metres
    pub radius: f64,
    /// GPS accuracy threshold in metres
    pub accuracy: f64,
    pub validation_order: Json<Vec<String>>,
    /// Business structure paths this place was imported with
    pub locations: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct KnownIpAddress {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "start")]
    pub start_address: String,
    #[serde(rename = "end")]
    pub end_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnownIpAddress {
    /// Stored bounds as a validated range
    pub fn range(&self) -> Result<IpAddressRange, IpRangeError> {
        IpAddressRange::new(&self.start_address, &self.end_address)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PlaceGroup {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: i64,
    pub kind: String,
    pub data: Json<serde_json::Value>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
