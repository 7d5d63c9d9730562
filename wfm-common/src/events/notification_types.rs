//! Notification and record-change type definitions
//!
//! Supporting types for the geo toolkit event stream.

use serde::{Deserialize, Serialize};

/// What a persisted notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A known place shares ancestry with another place's nodes
    KnownPlaceConflict,
    /// An IP range overlaps another range of the same user
    IpRangeOverlap,
}

impl NotificationKind {
    /// Value stored in `notifications.kind`
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::KnownPlaceConflict => "known_place_conflict",
            NotificationKind::IpRangeOverlap => "ip_range_overlap",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record types whose changes are announced on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    KnownPlace,
    KnownIpAddress,
    BusinessStructureNode,
    Group,
}

/// How a record changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordChange {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for RecordChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordChange::Created => write!(f, "created"),
            RecordChange::Updated => write!(f, "updated"),
            RecordChange::Deleted => write!(f, "deleted"),
        }
    }
}
