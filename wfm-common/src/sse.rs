//! Server-Sent Events (SSE) utilities

use crate::events::{EventBus, GeoEvent};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Interval between keep-alive comments
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Convert one bus event into an SSE frame if it belongs to `user_id`
pub fn event_for_user(event: &GeoEvent, user_id: i64) -> Option<Event> {
    if event.user_id() != user_id {
        return None;
    }
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            None
        }
    }
}

/// SSE stream of one user's events from the bus
///
/// Starts with a `ConnectionStatus` frame, then forwards the user's events
/// and sends a heartbeat comment every [`HEARTBEAT_INTERVAL`]. A lagged
/// receiver logs a warning and keeps streaming from the oldest retained event.
pub fn create_user_event_stream(
    bus: &EventBus,
    user_id: i64,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected for user {}", user_id);

    let mut rx = bus.subscribe();
    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            let frame = tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => event_for_user(&event, user_id),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("SSE client for user {} lagged, skipped {} events", user_id, skipped);
                        None
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event bus closed, ending SSE stream for user {}", user_id);
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    debug!("SSE: Sending heartbeat");
                    Some(Event::default().comment("heartbeat"))
                }
            };
            if let Some(frame) = frame {
                yield Ok(frame);
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
