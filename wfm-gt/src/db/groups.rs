use chrono::Utc;
use sqlx::SqlitePool;
use wfm_common::db::models::PlaceGroup;
use wfm_common::Result;

const COLUMNS: &str = "id, user_id, name, created_at, updated_at";

pub async fn list(pool: &SqlitePool, user_id: i64) -> Result<Vec<PlaceGroup>> {
    let groups = sqlx::query_as(&format!(
        "SELECT {} FROM place_groups WHERE user_id = ? ORDER BY name, id",
        COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(groups)
}

pub async fn find(pool: &SqlitePool, user_id: i64, id: i64) -> Result<Option<PlaceGroup>> {
    let group = sqlx::query_as(&format!(
        "SELECT {} FROM place_groups WHERE id = ? AND user_id = ?",
        COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(group)
}

pub async fn exists(pool: &SqlitePool, user_id: i64, id: i64) -> Result<bool> {
    let exists = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM place_groups WHERE id = ? AND user_id = ?)",
    )
    .bind(id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Unique-name violations surface as `sqlx` unique errors
pub async fn insert(pool: &SqlitePool, user_id: i64, name: &str) -> Result<PlaceGroup> {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO place_groups (user_id, name, created_at, updated_at) VALUES (?, ?, ?, ?) \
         RETURNING id",
    )
    .bind(user_id)
    .bind(name)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(PlaceGroup {
        id,
        user_id,
        name: name.to_string(),
        created_at: now,
        updated_at: now,
    })
}

pub async fn rename(pool: &SqlitePool, user_id: i64, id: i64, name: &str) -> Result<Option<PlaceGroup>> {
    let result = sqlx::query("UPDATE place_groups SET name = ?, updated_at = ? WHERE id = ? AND user_id = ?")
        .bind(name)
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

/// Member places keep existing; their `group_id` is cleared
pub async fn delete(pool: &SqlitePool, user_id: i64, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM place_groups WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
