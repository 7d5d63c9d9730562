use sqlx::SqlitePool;
use wfm_common::db::models::User;
use wfm_common::Result;

pub async fn find(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as(
        "SELECT id, name, email, api_token_hash, created_at, updated_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}
