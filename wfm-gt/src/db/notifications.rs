//! Notification repository
//!
//! Notification ids are v4 UUID strings.

use chrono::{Duration, Utc};
use sqlx::types::Json;
use sqlx::SqlitePool;
use uuid::Uuid;
use wfm_common::db::models::Notification;
use wfm_common::events::NotificationKind;
use wfm_common::Result;

const COLUMNS: &str = "id, user_id, kind, data, read_at, created_at";

pub async fn insert(
    pool: &SqlitePool,
    user_id: i64,
    kind: NotificationKind,
    data: serde_json::Value,
) -> Result<Notification> {
    let notification = Notification {
        id: Uuid::new_v4().to_string(),
        user_id,
        kind: kind.as_str().to_string(),
        data: Json(data),
        read_at: None,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO notifications (id, user_id, kind, data, read_at, created_at) \
         VALUES (?, ?, ?, ?, NULL, ?)",
    )
    .bind(&notification.id)
    .bind(user_id)
    .bind(&notification.kind)
    .bind(&notification.data)
    .bind(notification.created_at)
    .execute(pool)
    .await?;

    Ok(notification)
}

pub async fn count(pool: &SqlitePool, user_id: i64, unread_only: bool) -> Result<i64> {
    let total = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND (? = 0 OR read_at IS NULL)",
    )
    .bind(user_id)
    .bind(unread_only)
    .fetch_one(pool)
    .await?;
    Ok(total)
}

/// Newest first
pub async fn list(
    pool: &SqlitePool,
    user_id: i64,
    unread_only: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Notification>> {
    let rows = sqlx::query_as(&format!(
        "SELECT {} FROM notifications WHERE user_id = ? AND (? = 0 OR read_at IS NULL) \
         ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        COLUMNS
    ))
    .bind(user_id)
    .bind(unread_only)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find(pool: &SqlitePool, user_id: i64, id: &str) -> Result<Option<Notification>> {
    let row = sqlx::query_as(&format!(
        "SELECT {} FROM notifications WHERE id = ? AND user_id = ?",
        COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Marks an unread notification read; already-read rows keep their timestamp
pub async fn mark_read(pool: &SqlitePool, user_id: i64, id: &str) -> Result<Option<Notification>> {
    sqlx::query(
        "UPDATE notifications SET read_at = ? WHERE id = ? AND user_id = ? AND read_at IS NULL",
    )
    .bind(Utc::now())
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;

    find(pool, user_id, id).await
}

/// Returns the number of notifications that changed
pub async fn mark_all_read(pool: &SqlitePool, user_id: i64) -> Result<u64> {
    let result =
        sqlx::query("UPDATE notifications SET read_at = ? WHERE user_id = ? AND read_at IS NULL")
            .bind(Utc::now())
            .bind(user_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

pub async fn delete(pool: &SqlitePool, user_id: i64, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete read notifications older than `days`; `days <= 0` keeps everything
pub async fn prune_read(pool: &SqlitePool, days: i64) -> Result<u64> {
    if days <= 0 {
        return Ok(0);
    }
    let cutoff = Utc::now() - Duration::days(days);
    let result =
        sqlx::query("DELETE FROM notifications WHERE read_at IS NOT NULL AND created_at < ?")
            .bind(cutoff)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}
