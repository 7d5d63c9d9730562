//! Database schema migrations
//!
//! Tables are created with `CREATE TABLE IF NOT EXISTS`; anything that cannot
//! be expressed that way (indexes, columns added after release) lives here as
//! a numbered migration recorded in `schema_version`.
//!
//! Never modify an existing migration. Add a new `migrate_vN` and bump
//! [`CURRENT_SCHEMA_VERSION`]. Every migration must be idempotent.

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version has no rows
async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: indexes for nested-set range scans and per-user listings
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: nested-set and lookup indexes");

    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_nodes_user_bounds \
         ON business_structure_nodes (user_id, lft, rgt)",
        "CREATE INDEX IF NOT EXISTS idx_nodes_parent \
         ON business_structure_nodes (parent_id)",
        "CREATE INDEX IF NOT EXISTS idx_node_place_place \
         ON business_structure_node_known_place (known_place_id)",
        "CREATE INDEX IF NOT EXISTS idx_known_places_user \
         ON known_places (user_id, group_id)",
        "CREATE INDEX IF NOT EXISTS idx_ip_addresses_user \
         ON known_ip_addresses (user_id)",
        "CREATE INDEX IF NOT EXISTS idx_notifications_user_read \
         ON notifications (user_id, read_at, created_at)",
    ];

    for sql in statements {
        sqlx::query(sql).execute(pool).await?;
    }

    Ok(())
}

/// Migration v2: `description` on IP ranges (absent from early databases)
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: description column on known_ip_addresses");

    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('known_ip_addresses') WHERE name = 'description'",
    )
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        info!("  description column already exists - skipping");
        return Ok(());
    }

    sqlx::query("ALTER TABLE known_ip_addresses ADD COLUMN description TEXT")
        .execute(pool)
        .await?;

    info!("  Added description column to known_ip_addresses");
    Ok(())
}
