//! Overlapping IP range detection
//!
//! Overlaps produce an `ip_range_overlap` notification; they never fail
//! validation of the range being saved.

use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};
use wfm_common::db::models::KnownIpAddress;
use wfm_common::events::{EventBus, NotificationKind};
use wfm_common::{IpAddressRange, Result};

use super::notifier;
use crate::db::{ip_addresses, users};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlappingRange {
    pub id: i64,
    pub name: String,
    pub start: String,
    pub end: String,
}

/// Ranges in `others` that overlap `subject`, skipping the subject itself
/// and rows whose stored bounds no longer parse
pub fn find_overlaps(subject: &KnownIpAddress, others: &[KnownIpAddress]) -> Vec<OverlappingRange> {
    let Ok(range) = subject.range() else {
        return Vec::new();
    };

    others
        .iter()
        .filter(|other| other.id != subject.id)
        .filter(|other| match other.range() {
            Ok(other_range) => range.overlaps(&other_range),
            Err(e) => {
                warn!("Skipping IP range {} with invalid bounds: {}", other.id, e);
                false
            }
        })
        .map(|other| OverlappingRange {
            id: other.id,
            name: other.name.clone(),
            start: other.start_address.clone(),
            end: other.end_address.clone(),
        })
        .collect()
}

/// Job body: check one range and notify its owner about overlaps
pub async fn check_ip_address(pool: &SqlitePool, bus: &EventBus, ip_address_id: i64) {
    if let Err(e) = run_check(pool, bus, ip_address_id).await {
        error!("Overlap check for IP range {} failed: {}", ip_address_id, e);
    }
}

async fn run_check(pool: &SqlitePool, bus: &EventBus, ip_address_id: i64) -> Result<()> {
    let Some(subject) = ip_addresses::find_any(pool, ip_address_id).await? else {
        warn!("IP range {} no longer exists, skipping overlap check", ip_address_id);
        return Ok(());
    };

    let others = ip_addresses::list_all(pool, subject.user_id).await?;
    let overlaps = find_overlaps(&subject, &others);
    if overlaps.is_empty() {
        debug!("IP range {} overlaps nothing", ip_address_id);
        return Ok(());
    }

    let Some(user) = users::find(pool, subject.user_id).await? else {
        warn!("Owner {} of IP range {} not found, not notifying", subject.user_id, ip_address_id);
        return Ok(());
    };

    let range: IpAddressRange = subject.range()?;
    let data = json!({
        "ip_address_id": subject.id,
        "name": &subject.name,
        "range": range.to_string(),
        "message": format!(
            "IP range '{}' ({}) overlaps {} other range(s)",
            subject.name,
            range,
            overlaps.len()
        ),
        "overlaps": &overlaps,
    });
    notifier::notify(pool, bus, user.id, NotificationKind::IpRangeOverlap, data).await?;

    info!("IP range {} overlaps {} other ranges", ip_address_id, overlaps.len());
    Ok(())
}
