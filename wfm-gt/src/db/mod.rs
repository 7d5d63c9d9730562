//! Repositories
//!
//! Every query that touches user-owned rows filters on `user_id`; a row owned
//! by someone else is indistinguishable from a missing row.

pub mod groups;
pub mod ip_addresses;
pub mod nodes;
pub mod notifications;
pub mod places;
pub mod types;
pub mod users;

use sqlx::SqlitePool;
use wfm_common::db::init::get_setting;
use wfm_common::Result;

use crate::pagination::DEFAULT_PER_PAGE;

/// Settings the service reads at request and job time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub conflict_check_enabled: bool,
    pub ip_overlap_check_enabled: bool,
    pub page_size: i64,
    pub notification_retention_days: i64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            conflict_check_enabled: true,
            ip_overlap_check_enabled: true,
            page_size: DEFAULT_PER_PAGE,
            notification_retention_days: 90,
        }
    }
}

impl RuntimeSettings {
    /// Read the settings table, falling back to defaults for missing or
    /// unparsable values
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            conflict_check_enabled: parse_or(
                get_setting(pool, "known_place_conflict_check_enabled").await?,
                defaults.conflict_check_enabled,
            ),
            ip_overlap_check_enabled: parse_or(
                get_setting(pool, "ip_overlap_check_enabled").await?,
                defaults.ip_overlap_check_enabled,
            ),
            page_size: parse_or(get_setting(pool, "page_size").await?, defaults.page_size),
            notification_retention_days: parse_or(
                get_setting(pool, "notification_retention_days").await?,
                defaults.notification_retention_days,
            ),
        })
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
