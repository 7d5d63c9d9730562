use chrono::Utc;
use sqlx::SqlitePool;
use wfm_common::db::models::Notification;
use wfm_common::events::{EventBus, GeoEvent, NotificationKind};
use wfm_common::Result;

use crate::db::notifications;

/// Persist a notification for `user_id` and broadcast it
pub async fn notify(
    pool: &SqlitePool,
    bus: &EventBus,
    user_id: i64,
    kind: NotificationKind,
    data: serde_json::Value,
) -> Result<Notification> {
    let notification = notifications::insert(pool, user_id, kind, data).await?;

    bus.emit_lossy(GeoEvent::NotificationCreated {
        user_id,
        notification_id: notification.id.clone(),
        kind,
        data: notification.data.0.clone(),
        timestamp: Utc::now(),
    });

    Ok(notification)
}
