//! Business structure types
//!
//! Type rows are shared by name across users; each user attaches a type
//! through the `business_structure_type_user` pivot, which carries that
//! user's color and description.

use chrono::Utc;
use sqlx::SqlitePool;
use wfm_common::db::models::UserBusinessStructureType;
use wfm_common::{Error, Result};

const SELECT: &str = "SELECT t.id, t.name, p.color, p.description \
                      FROM business_structure_types t \
                      JOIN business_structure_type_user p ON p.business_structure_type_id = t.id";

pub async fn list_for_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<UserBusinessStructureType>> {
    let types = sqlx::query_as(&format!("{} WHERE p.user_id = ? ORDER BY t.name", SELECT))
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(types)
}

pub async fn find_for_user(
    pool: &SqlitePool,
    user_id: i64,
    type_id: i64,
) -> Result<Option<UserBusinessStructureType>> {
    let found = sqlx::query_as(&format!("{} WHERE p.user_id = ? AND t.id = ?", SELECT))
        .bind(user_id)
        .bind(type_id)
        .fetch_optional(pool)
        .await?;
    Ok(found)
}

/// Find or create the type called `name` and attach it to the user
pub async fn attach(
    pool: &SqlitePool,
    user_id: i64,
    name: &str,
    color: &str,
    description: Option<&str>,
) -> Result<UserBusinessStructureType> {
    let mut tx = pool.begin().await?;

    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM business_structure_types WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;

    let type_id = match existing {
        Some(id) => id,
        None => {
            let now = Utc::now();
            sqlx::query_scalar(
                "INSERT INTO business_structure_types (name, created_at, updated_at) \
                 VALUES (?, ?, ?) RETURNING id",
            )
            .bind(name)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    let attached: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM business_structure_type_user \
         WHERE user_id = ? AND business_structure_type_id = ?)",
    )
    .bind(user_id)
    .bind(type_id)
    .fetch_one(&mut *tx)
    .await?;
    if attached {
        return Err(Error::Conflict(format!("type '{}' is already attached", name)));
    }

    sqlx::query(
        "INSERT INTO business_structure_type_user \
         (user_id, business_structure_type_id, color, description) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(type_id)
    .bind(color)
    .bind(description)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(UserBusinessStructureType {
        id: type_id,
        name: name.to_string(),
        color: color.to_string(),
        description: description.map(str::to_string),
    })
}

pub async fn update_pivot(
    pool: &SqlitePool,
    user_id: i64,
    type_id: i64,
    color: &str,
    description: Option<&str>,
) -> Result<Option<UserBusinessStructureType>> {
    let result = sqlx::query(
        "UPDATE business_structure_type_user SET color = ?, description = ? \
         WHERE user_id = ? AND business_structure_type_id = ?",
    )
    .bind(color)
    .bind(description)
    .bind(user_id)
    .bind(type_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    find_for_user(pool, user_id, type_id).await
}

/// Remove the pivot row; the shared type row stays
///
/// The user's nodes of this type lose their type.
pub async fn detach(pool: &SqlitePool, user_id: i64, type_id: i64) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "DELETE FROM business_structure_type_user WHERE user_id = ? AND business_structure_type_id = ?",
    )
    .bind(user_id)
    .bind(type_id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query(
        "UPDATE business_structure_nodes SET business_structure_type_id = NULL, updated_at = ? \
         WHERE user_id = ? AND business_structure_type_id = ?",
    )
    .bind(Utc::now())
    .bind(user_id)
    .bind(type_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}
