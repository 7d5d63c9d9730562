//! Known IP address range repository

use chrono::Utc;
use sqlx::SqlitePool;
use wfm_common::db::models::KnownIpAddress;
use wfm_common::{IpAddressRange, Result};

const COLUMNS: &str =
    "id, user_id, name, description, start_address, end_address, created_at, updated_at";

/// Validated IP range fields
#[derive(Debug, Clone, PartialEq)]
pub struct IpAddressInput {
    pub name: String,
    pub description: Option<String>,
    pub range: IpAddressRange,
}

pub async fn count(pool: &SqlitePool, user_id: i64) -> Result<i64> {
    let total = sqlx::query_scalar("SELECT COUNT(*) FROM known_ip_addresses WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(total)
}

pub async fn list(pool: &SqlitePool, user_id: i64, limit: i64, offset: i64) -> Result<Vec<KnownIpAddress>> {
    let rows = sqlx::query_as(&format!(
        "SELECT {} FROM known_ip_addresses WHERE user_id = ? ORDER BY name, id LIMIT ? OFFSET ?",
        COLUMNS
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_all(pool: &SqlitePool, user_id: i64) -> Result<Vec<KnownIpAddress>> {
    let rows = sqlx::query_as(&format!(
        "SELECT {} FROM known_ip_addresses WHERE user_id = ? ORDER BY id",
        COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find(pool: &SqlitePool, user_id: i64, id: i64) -> Result<Option<KnownIpAddress>> {
    let row = sqlx::query_as(&format!(
        "SELECT {} FROM known_ip_addresses WHERE id = ? AND user_id = ?",
        COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Lookup without an owner filter, for background jobs
pub async fn find_any(pool: &SqlitePool, id: i64) -> Result<Option<KnownIpAddress>> {
    let row = sqlx::query_as(&format!("SELECT {} FROM known_ip_addresses WHERE id = ?", COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn find_by_name(pool: &SqlitePool, user_id: i64, name: &str) -> Result<Option<KnownIpAddress>> {
    let row = sqlx::query_as(&format!(
        "SELECT {} FROM known_ip_addresses WHERE user_id = ? AND name = ?",
        COLUMNS
    ))
    .bind(user_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn insert(pool: &SqlitePool, user_id: i64, input: &IpAddressInput) -> Result<KnownIpAddress> {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO known_ip_addresses (user_id, name, description, start_address, end_address, \
         created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.range.start().to_string())
    .bind(input.range.end().to_string())
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    find(pool, user_id, id)
        .await?
        .ok_or_else(|| wfm_common::Error::Internal(format!("IP range {} vanished after insert", id)))
}

pub async fn update(
    pool: &SqlitePool,
    user_id: i64,
    id: i64,
    input: &IpAddressInput,
) -> Result<Option<KnownIpAddress>> {
    let result = sqlx::query(
        "UPDATE known_ip_addresses SET name = ?, description = ?, start_address = ?, \
         end_address = ?, updated_at = ? WHERE id = ? AND user_id = ?",
    )
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.range.start().to_string())
    .bind(input.range.end().to_string())
    .bind(Utc::now())
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    find(pool, user_id, id).await
}

pub async fn delete(pool: &SqlitePool, user_id: i64, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM known_ip_addresses WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
