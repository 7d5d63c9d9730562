//! Hierarchy conflict detection
//!
//! A known place conflicts with another place when one of its business
//! structure nodes is an ancestor or a descendant of a node linked to the
//! other place. Places linked to descendants of the subject's nodes are
//! narrower than the subject (`descendant_conflicts`); places linked to
//! ancestors are broader (`ancestor_conflicts`).
//!
//! Two places linked to the very same node are not in conflict.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, error, info, warn};
use wfm_common::db::models::KnownPlace;
use wfm_common::events::{EventBus, GeoEvent, NotificationKind};
use wfm_common::nested_set::{is_ancestor, is_descendant, NestedNode};
use wfm_common::Result;

use super::notifier;
use crate::db::places::PlaceLink;
use crate::db::{nodes, places, users};

/// Another place sharing ancestry with the subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictingPlace {
    pub id: i64,
    pub name: String,
    /// The other place's nodes that caused the conflict, ascending
    pub node_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub known_place_id: i64,
    pub descendant_conflicts: Vec<ConflictingPlace>,
    pub ancestor_conflicts: Vec<ConflictingPlace>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.descendant_conflicts.is_empty() && self.ancestor_conflicts.is_empty()
    }
}

/// Find every other place linked to an ancestor or descendant of the
/// subject's nodes
///
/// `tree_nodes` must be the subject owner's nodes and `links` that owner's
/// node-to-place links. Subject node ids missing from `tree_nodes` are
/// ignored.
pub fn detect_conflicts<N: NestedNode>(
    subject_place_id: i64,
    subject_node_ids: &[i64],
    tree_nodes: &[N],
    links: &[PlaceLink],
) -> ConflictReport {
    let subject_ids: HashSet<i64> = subject_node_ids.iter().copied().collect();
    let subject_nodes: Vec<&N> = tree_nodes
        .iter()
        .filter(|n| subject_ids.contains(&n.id()))
        .collect();

    let mut ancestor_ids = HashSet::new();
    let mut descendant_ids = HashSet::new();
    for subject in &subject_nodes {
        for node in tree_nodes {
            if is_ancestor(node, *subject) {
                ancestor_ids.insert(node.id());
            } else if is_descendant(node, *subject) {
                descendant_ids.insert(node.id());
            }
        }
    }

    let mut descendants: BTreeMap<i64, (String, BTreeSet<i64>)> = BTreeMap::new();
    let mut ancestors: BTreeMap<i64, (String, BTreeSet<i64>)> = BTreeMap::new();

    for link in links.iter().filter(|l| l.known_place_id != subject_place_id) {
        if descendant_ids.contains(&link.node_id) {
            descendants
                .entry(link.known_place_id)
                .or_insert_with(|| (link.known_place_name.clone(), BTreeSet::new()))
                .1
                .insert(link.node_id);
        }
        if ancestor_ids.contains(&link.node_id) {
            ancestors
                .entry(link.known_place_id)
                .or_insert_with(|| (link.known_place_name.clone(), BTreeSet::new()))
                .1
                .insert(link.node_id);
        }
    }

    ConflictReport {
        known_place_id: subject_place_id,
        descendant_conflicts: into_places(descendants),
        ancestor_conflicts: into_places(ancestors),
    }
}

fn into_places(bucket: BTreeMap<i64, (String, BTreeSet<i64>)>) -> Vec<ConflictingPlace> {
    bucket
        .into_iter()
        .map(|(id, (name, node_ids))| ConflictingPlace {
            id,
            name,
            node_ids: node_ids.into_iter().collect(),
        })
        .collect()
}

/// Load the place's owner tree and links and run [`detect_conflicts`]
pub async fn conflict_report(pool: &SqlitePool, place: &KnownPlace) -> Result<ConflictReport> {
    let node_ids = places::node_ids(pool, place.id).await?;
    let tree = nodes::list(pool, place.user_id).await?;
    let links = places::links_for_user(pool, place.user_id).await?;
    Ok(detect_conflicts(place.id, &node_ids, &tree, &links))
}

/// Job body: check one place and notify its owner about conflicts
pub async fn check_known_place(pool: &SqlitePool, bus: &EventBus, known_place_id: i64) {
    if let Err(e) = run_check(pool, bus, known_place_id).await {
        error!("Conflict check for known place {} failed: {}", known_place_id, e);
    }
}

async fn run_check(pool: &SqlitePool, bus: &EventBus, known_place_id: i64) -> Result<()> {
    let Some(place) = places::find_any(pool, known_place_id).await? else {
        warn!("Known place {} no longer exists, skipping conflict check", known_place_id);
        return Ok(());
    };

    let report = conflict_report(pool, &place).await?;

    bus.emit_lossy(GeoEvent::ConflictCheckCompleted {
        user_id: place.user_id,
        known_place_id,
        ancestor_conflicts: report.ancestor_conflicts.len(),
        descendant_conflicts: report.descendant_conflicts.len(),
        timestamp: Utc::now(),
    });

    if report.is_empty() {
        debug!("Known place {} has no hierarchy conflicts", known_place_id);
        return Ok(());
    }

    let Some(user) = users::find(pool, place.user_id).await? else {
        warn!("Owner {} of known place {} not found, not notifying", place.user_id, known_place_id);
        return Ok(());
    };

    let data = json!({
        "known_place_id": place.id,
        "known_place_name": &place.name,
        "message": conflict_message(&place.name, &report),
        "descendant_conflicts": &report.descendant_conflicts,
        "ancestor_conflicts": &report.ancestor_conflicts,
    });
    notifier::notify(pool, bus, user.id, NotificationKind::KnownPlaceConflict, data).await?;

    info!(
        "Known place {} conflicts with {} descendant and {} ancestor places",
        known_place_id,
        report.descendant_conflicts.len(),
        report.ancestor_conflicts.len()
    );
    Ok(())
}

/// One-line human summary for the notification
pub fn conflict_message(place_name: &str, report: &ConflictReport) -> String {
    let names = |places: &[ConflictingPlace]| {
        places.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
    };

    let mut parts = Vec::new();
    if !report.descendant_conflicts.is_empty() {
        parts.push(format!(
            "covers nodes already assigned to {}",
            names(&report.descendant_conflicts)
        ));
    }
    if !report.ancestor_conflicts.is_empty() {
        parts.push(format!(
            "sits below nodes assigned to {}",
            names(&report.ancestor_conflicts)
        ));
    }
    format!("Known place '{}' {}", place_name, parts.join(" and "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfm_common::nested_set::NodeBounds;

    //   1 Company            (1..12)
    //   ├─ 2 Region North    (2..7)
    //   │  ├─ 4 Site A       (3..4)
    //   │  └─ 5 Site B       (5..6)
    //   └─ 3 Region South    (8..11)
    //      └─ 6 Site C       (9..10)
    //   7 Other root         (13..14)
    fn tree() -> Vec<NodeBounds> {
        let n = |id, parent_id, lft, rgt| NodeBounds { id, parent_id, lft, rgt };
        vec![
            n(1, None, 1, 12),
            n(2, Some(1), 2, 7),
            n(4, Some(2), 3, 4),
            n(5, Some(2), 5, 6),
            n(3, Some(1), 8, 11),
            n(6, Some(3), 9, 10),
            n(7, None, 13, 14),
        ]
    }

    fn link(node_id: i64, known_place_id: i64, name: &str) -> PlaceLink {
        PlaceLink {
            node_id,
            known_place_id,
            known_place_name: name.to_string(),
        }
    }

    #[test]
    fn test_broader_place_reports_descendants() {
        let links = vec![
            link(2, 10, "North office"),
            link(4, 11, "Site A gate"),
            link(5, 12, "Site B gate"),
            link(6, 13, "Site C gate"),
        ];
        let report = detect_conflicts(10, &[2], &tree(), &links);

        let ids: Vec<i64> = report.descendant_conflicts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![11, 12]);
        assert!(report.ancestor_conflicts.is_empty());
        assert_eq!(report.descendant_conflicts[0].node_ids, vec![4]);
    }

    #[test]
    fn test_narrower_place_reports_ancestors() {
        let links = vec![link(1, 20, "HQ"), link(3, 21, "South"), link(6, 22, "Site C")];
        let report = detect_conflicts(22, &[6], &tree(), &links);

        let ids: Vec<i64> = report.ancestor_conflicts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![20, 21]);
        assert!(report.descendant_conflicts.is_empty());
    }

    #[test]
    fn test_same_node_is_not_a_conflict() {
        let links = vec![link(4, 30, "A"), link(4, 31, "B")];
        let report = detect_conflicts(30, &[4], &tree(), &links);
        assert!(report.is_empty());
    }

    #[test]
    fn test_siblings_and_other_roots_do_not_conflict() {
        let links = vec![link(4, 40, "A"), link(5, 41, "B"), link(7, 42, "Other")];
        let report = detect_conflicts(40, &[4], &tree(), &links);
        assert!(report.is_empty());
    }

    #[test]
    fn test_subject_never_reports_itself() {
        // subject linked to both a node and its descendant
        let links = vec![link(2, 50, "Self"), link(4, 50, "Self")];
        let report = detect_conflicts(50, &[2, 4], &tree(), &links);
        assert!(report.is_empty());
    }

    #[test]
    fn test_union_across_subject_nodes_and_both_buckets() {
        // subject on 1 and 4: place 60 on node 2 is below 1 and above 4
        let links = vec![link(1, 99, "Subject"), link(4, 99, "Subject"), link(2, 60, "North")];
        let report = detect_conflicts(99, &[1, 4], &tree(), &links);

        assert_eq!(report.descendant_conflicts.len(), 1);
        assert_eq!(report.ancestor_conflicts.len(), 1);
        assert_eq!(report.descendant_conflicts[0].id, 60);
        assert_eq!(report.ancestor_conflicts[0].id, 60);
    }

    #[test]
    fn test_place_listed_once_with_all_nodes() {
        let links = vec![link(4, 70, "Sites"), link(6, 70, "Sites"), link(5, 70, "Sites")];
        let report = detect_conflicts(1, &[1], &tree(), &links);

        assert_eq!(report.descendant_conflicts.len(), 1);
        assert_eq!(report.descendant_conflicts[0].node_ids, vec![4, 5, 6]);
    }

    #[test]
    fn test_no_nodes_no_conflicts() {
        let links = vec![link(4, 80, "A")];
        assert!(detect_conflicts(81, &[], &tree(), &links).is_empty());
        assert!(detect_conflicts(81, &[404], &tree(), &links).is_empty());
    }

    #[test]
    fn test_conflict_message() {
        let report = ConflictReport {
            known_place_id: 1,
            descendant_conflicts: vec![ConflictingPlace { id: 2, name: "Gate".into(), node_ids: vec![4] }],
            ancestor_conflicts: vec![ConflictingPlace { id: 3, name: "HQ".into(), node_ids: vec![1] }],
        };
        assert_eq!(
            conflict_message("North", &report),
            "Known place 'North' covers nodes already assigned to Gate and sits below nodes assigned to HQ"
        );
    }
}
