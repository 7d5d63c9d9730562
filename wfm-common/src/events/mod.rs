//! Event types and the in-process event bus
//!
//! Handlers and the job worker publish [`GeoEvent`]s; the SSE endpoint
//! subscribes and forwards each user's events to that user's browsers.

mod notification_types;

pub use notification_types::{NotificationKind, RecordChange, RecordType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Geo toolkit event types
///
/// Every event is scoped to the user who owns the affected records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoEvent {
    /// A notification row was persisted
    ///
    /// Triggers:
    /// - SSE: show the alert and bump the unread badge
    NotificationCreated {
        user_id: i64,
        notification_id: String,
        kind: NotificationKind,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// A record was created, updated or deleted through the API
    ///
    /// Triggers:
    /// - SSE: refresh lists and the map
    RecordChanged {
        user_id: i64,
        record: RecordType,
        record_id: i64,
        change: RecordChange,
        timestamp: DateTime<Utc>,
    },

    /// A known place conflict check finished
    ConflictCheckCompleted {
        user_id: i64,
        known_place_id: i64,
        ancestor_conflicts: usize,
        descendant_conflicts: usize,
        timestamp: DateTime<Utc>,
    },
}

impl GeoEvent {
    /// Owner of the records this event is about
    pub fn user_id(&self) -> i64 {
        match self {
            GeoEvent::NotificationCreated { user_id, .. }
            | GeoEvent::RecordChanged { user_id, .. }
            | GeoEvent::ConflictCheckCompleted { user_id, .. } => *user_id,
        }
    }

    /// SSE `event:` field for this event
    pub fn event_type(&self) -> &'static str {
        match self {
            GeoEvent::NotificationCreated { .. } => "NotificationCreated",
            GeoEvent::RecordChanged { .. } => "RecordChanged",
            GeoEvent::ConflictCheckCompleted { .. } => "ConflictCheckCompleted",
        }
    }
}

/// Central event distribution bus
///
/// Wraps a `tokio::sync::broadcast` channel: publishing never blocks, slow
/// subscribers see a lag error instead of stalling producers, and receivers
/// clean up when dropped.
///
/// # Examples
///
/// ```
/// use wfm_common::events::{EventBus, GeoEvent, RecordChange, RecordType};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(GeoEvent::RecordChanged {
///     user_id: 1,
///     record: RecordType::KnownPlace,
///     record_id: 7,
///     change: RecordChange::Created,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().user_id(), 1);
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GeoEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<GeoEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: GeoEvent) -> Result<usize, broadcast::error::SendError<GeoEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    ///
    /// Notifications are persisted before they are emitted, so a missed
    /// broadcast only delays the alert until the next page load.
    pub fn emit_lossy(&self, event: GeoEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
