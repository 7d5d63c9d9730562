//! Known place repository

use chrono::Utc;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use wfm_common::db::models::KnownPlace;
use wfm_common::Result;

const COLUMNS: &str = "id, user_id, group_id, name, description, latitude, longitude, radius, \
                       accuracy, validation_order, locations, created_at, updated_at";

/// Validated known place fields
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceInput {
    pub name: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
    pub accuracy: f64,
    pub validation_order: Vec<String>,
    pub locations: Vec<String>,
    pub group_id: Option<i64>,
}

/// A node-to-place link, with the place name for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct PlaceLink {
    pub node_id: i64,
    pub known_place_id: i64,
    pub known_place_name: String,
}

pub async fn count(pool: &SqlitePool, user_id: i64, group_id: Option<i64>) -> Result<i64> {
    let total = sqlx::query_scalar(
        "SELECT COUNT(*) FROM known_places WHERE user_id = ? AND (? IS NULL OR group_id = ?)",
    )
    .bind(user_id)
    .bind(group_id)
    .bind(group_id)
    .fetch_one(pool)
    .await?;
    Ok(total)
}

pub async fn list(
    pool: &SqlitePool,
    user_id: i64,
    group_id: Option<i64>,
    limit: i64,
    offset: i64,
) -> Result<Vec<KnownPlace>> {
    let places = sqlx::query_as(&format!(
        "SELECT {} FROM known_places WHERE user_id = ? AND (? IS NULL OR group_id = ?) \
         ORDER BY name, id LIMIT ? OFFSET ?",
        COLUMNS
    ))
    .bind(user_id)
    .bind(group_id)
    .bind(group_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(places)
}

/// Every place of a user, unpaginated
pub async fn list_all(pool: &SqlitePool, user_id: i64) -> Result<Vec<KnownPlace>> {
    let places = sqlx::query_as(&format!(
        "SELECT {} FROM known_places WHERE user_id = ? ORDER BY id",
        COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(places)
}

pub async fn list_for_group(pool: &SqlitePool, user_id: i64, group_id: i64) -> Result<Vec<KnownPlace>> {
    let places = sqlx::query_as(&format!(
        "SELECT {} FROM known_places WHERE user_id = ? AND group_id = ? ORDER BY name, id",
        COLUMNS
    ))
    .bind(user_id)
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    Ok(places)
}

pub async fn find<'e, E>(executor: E, user_id: i64, id: i64) -> Result<Option<KnownPlace>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let place = sqlx::query_as(&format!(
        "SELECT {} FROM known_places WHERE id = ? AND user_id = ?",
        COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?;
    Ok(place)
}

/// Lookup without an owner filter, for background jobs
pub async fn find_any(pool: &SqlitePool, id: i64) -> Result<Option<KnownPlace>> {
    let place = sqlx::query_as(&format!("SELECT {} FROM known_places WHERE id = ?", COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(place)
}

pub async fn find_by_name(pool: &SqlitePool, user_id: i64, name: &str) -> Result<Option<KnownPlace>> {
    let place = sqlx::query_as(&format!(
        "SELECT {} FROM known_places WHERE user_id = ? AND name = ?",
        COLUMNS
    ))
    .bind(user_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(place)
}

/// Insert a place and, when `node_ids` is given, its node links in one
/// transaction
pub async fn insert(
    pool: &SqlitePool,
    user_id: i64,
    input: &PlaceInput,
    node_ids: Option<&[i64]>,
) -> Result<KnownPlace> {
    let mut tx = pool.begin().await?;

    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO known_places (user_id, group_id, name, description, latitude, longitude, \
         radius, accuracy, validation_order, locations, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(input.group_id)
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.latitude)
    .bind(input.longitude)
    .bind(input.radius)
    .bind(input.accuracy)
    .bind(Json(&input.validation_order))
    .bind(Json(&input.locations))
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    if let Some(node_ids) = node_ids {
        write_links(&mut *tx, id, node_ids).await?;
    }

    let place = find(&mut *tx, user_id, id)
        .await?
        .ok_or_else(|| wfm_common::Error::Internal(format!("known place {} vanished after insert", id)))?;
    tx.commit().await?;
    Ok(place)
}

/// Update a place and, when `node_ids` is given, replace its node links in
/// one transaction
///
/// Returns `None` when the place does not exist for this user.
pub async fn update(
    pool: &SqlitePool,
    user_id: i64,
    id: i64,
    input: &PlaceInput,
    node_ids: Option<&[i64]>,
) -> Result<Option<KnownPlace>> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE known_places SET group_id = ?, name = ?, description = ?, latitude = ?, \
         longitude = ?, radius = ?, accuracy = ?, validation_order = ?, locations = ?, \
         updated_at = ? WHERE id = ? AND user_id = ?",
    )
    .bind(input.group_id)
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.latitude)
    .bind(input.longitude)
    .bind(input.radius)
    .bind(input.accuracy)
    .bind(Json(&input.validation_order))
    .bind(Json(&input.locations))
    .bind(Utc::now())
    .bind(id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    if let Some(node_ids) = node_ids {
        write_links(&mut *tx, id, node_ids).await?;
    }

    let place = find(&mut *tx, user_id, id).await?;
    tx.commit().await?;
    Ok(place)
}

pub async fn delete(pool: &SqlitePool, user_id: i64, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM known_places WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Node ids linked to a place, ascending
pub async fn node_ids(pool: &SqlitePool, place_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT business_structure_node_id FROM business_structure_node_known_place \
         WHERE known_place_id = ? ORDER BY business_structure_node_id",
    )
    .bind(place_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Replace the linked node set of a place
pub async fn sync_nodes(pool: &SqlitePool, place_id: i64, node_ids: &[i64]) -> Result<()> {
    let mut tx = pool.begin().await?;
    write_links(&mut *tx, place_id, node_ids).await?;
    tx.commit().await?;
    Ok(())
}

async fn write_links(conn: &mut SqliteConnection, place_id: i64, node_ids: &[i64]) -> Result<()> {
    sqlx::query("DELETE FROM business_structure_node_known_place WHERE known_place_id = ?")
        .bind(place_id)
        .execute(&mut *conn)
        .await?;

    for node_id in node_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO business_structure_node_known_place \
             (business_structure_node_id, known_place_id) VALUES (?, ?)",
        )
        .bind(node_id)
        .bind(place_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Every node-to-place link of a user
pub async fn links_for_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<PlaceLink>> {
    let links = sqlx::query_as(
        "SELECT l.business_structure_node_id AS node_id, p.id AS known_place_id, \
                p.name AS known_place_name \
         FROM business_structure_node_known_place l \
         JOIN known_places p ON p.id = l.known_place_id \
         WHERE p.user_id = ? \
         ORDER BY p.id, l.business_structure_node_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(links)
}

/// Distinct ids of places linked to any of `node_ids`
pub async fn linked_to_nodes<'e, E>(executor: E, node_ids: &[i64]) -> Result<Vec<i64>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    if node_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT DISTINCT known_place_id FROM business_structure_node_known_place \
         WHERE business_structure_node_id IN (",
    );
    let mut separated = query.separated(", ");
    for id in node_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY known_place_id");

    let ids = query.build_query_scalar().fetch_all(executor).await?;
    Ok(ids)
}
