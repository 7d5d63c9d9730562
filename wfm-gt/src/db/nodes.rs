//! Business structure node repository
//!
//! Nodes form one nested-set forest per user. Inserts open a gap at the
//! parent's right bound and deletes close it again; moves and renames
//! recompute paths and rebuild every bound of the owner inside one
//! transaction.
//!
//! Gap shifts run as a single `UPDATE` with `CASE` expressions so that each
//! row keeps `lft < rgt` at every step.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;
use wfm_common::db::models::BusinessStructureNode;
use wfm_common::nested_set::{check_move, is_ancestor, rebuild, NestedSetError};
use wfm_common::{Error, Result};

use super::places;

const COLUMNS: &str = "id, user_id, business_structure_type_id, parent_id, name, path, lft, rgt, \
                       created_at, updated_at";

/// Separator between node names in `path`
pub const PATH_SEPARATOR: &str = "/";

#[derive(Debug, Clone)]
pub struct NewNode {
    pub name: String,
    pub parent_id: Option<i64>,
    pub type_id: Option<i64>,
}

/// Partial update; `Some(None)` clears an optional column
#[derive(Debug, Clone, Default)]
pub struct NodeChanges {
    pub name: Option<String>,
    pub parent_id: Option<Option<i64>>,
    pub type_id: Option<Option<i64>>,
}

/// Result of a structural update
#[derive(Debug, Clone)]
pub struct NodeChange {
    pub node: BusinessStructureNode,
    /// Places whose ancestor/descendant relations may have changed
    pub affected_places: Vec<i64>,
}

/// All nodes of a user in tree (lft) order
pub async fn list(pool: &SqlitePool, user_id: i64) -> Result<Vec<BusinessStructureNode>> {
    load_all(pool, user_id).await
}

pub async fn find(pool: &SqlitePool, user_id: i64, id: i64) -> Result<Option<BusinessStructureNode>> {
    let node = sqlx::query_as(&format!(
        "SELECT {} FROM business_structure_nodes WHERE id = ? AND user_id = ?",
        COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(node)
}

/// The subset of `ids` owned by `user_id`
pub async fn owned_ids(pool: &SqlitePool, user_id: i64, ids: &[i64]) -> Result<HashSet<i64>> {
    let owned: HashSet<i64> =
        sqlx::query_scalar::<_, i64>("SELECT id FROM business_structure_nodes WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect();
    Ok(ids.iter().copied().filter(|id| owned.contains(id)).collect())
}

async fn load_all<'e, E>(executor: E, user_id: i64) -> Result<Vec<BusinessStructureNode>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let nodes = sqlx::query_as(&format!(
        "SELECT {} FROM business_structure_nodes WHERE user_id = ? ORDER BY lft",
        COLUMNS
    ))
    .bind(user_id)
    .fetch_all(executor)
    .await?;
    Ok(nodes)
}

/// Append a node as the last child of its parent, or as the last root
pub async fn create(pool: &SqlitePool, user_id: i64, new: &NewNode) -> Result<BusinessStructureNode> {
    let mut tx = pool.begin().await?;

    let (path, lft) = match new.parent_id {
        Some(parent_id) => {
            let parent: BusinessStructureNode = sqlx::query_as(&format!(
                "SELECT {} FROM business_structure_nodes WHERE id = ? AND user_id = ?",
                COLUMNS
            ))
            .bind(parent_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("business structure node {}", parent_id)))?;

            sqlx::query(
                "UPDATE business_structure_nodes \
                 SET lft = CASE WHEN lft > ? THEN lft + 2 ELSE lft END, \
                     rgt = CASE WHEN rgt >= ? THEN rgt + 2 ELSE rgt END \
                 WHERE user_id = ? AND rgt >= ?",
            )
            .bind(parent.rgt)
            .bind(parent.rgt)
            .bind(user_id)
            .bind(parent.rgt)
            .execute(&mut *tx)
            .await?;

            (join_path(Some(&parent.path), &new.name), parent.rgt)
        }
        None => {
            let max_rgt: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(rgt), 0) FROM business_structure_nodes WHERE user_id = ?",
            )
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
            (join_path(None, &new.name), max_rgt + 1)
        }
    };

    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM business_structure_nodes WHERE user_id = ? AND path = ?)",
    )
    .bind(user_id)
    .bind(&path)
    .fetch_one(&mut *tx)
    .await?;
    if taken {
        return Err(Error::Conflict(format!("a node with path '{}' already exists", path)));
    }

    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO business_structure_nodes \
         (user_id, business_structure_type_id, parent_id, name, path, lft, rgt, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(new.type_id)
    .bind(new.parent_id)
    .bind(&new.name)
    .bind(&path)
    .bind(lft)
    .bind(lft + 1)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    debug!("Created business structure node {} at {}", id, path);

    find(pool, user_id, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("node {} vanished after insert", id)))
}

/// Rename, re-parent or re-type a node
///
/// Returns `None` when the node does not exist for this user.
pub async fn update(
    pool: &SqlitePool,
    user_id: i64,
    id: i64,
    changes: &NodeChanges,
) -> Result<Option<NodeChange>> {
    let mut tx = pool.begin().await?;

    let original = load_all(&mut *tx, user_id).await?;
    let Some(index) = original.iter().position(|n| n.id == id) else {
        return Ok(None);
    };

    let moved = matches!(changes.parent_id, Some(p) if p != original[index].parent_id);
    if let Some(new_parent) = changes.parent_id {
        let parents: HashMap<i64, Option<i64>> =
            original.iter().map(|n| (n.id, n.parent_id)).collect();
        check_move(&parents, id, new_parent)?;
    }

    let mut nodes = original.clone();
    {
        let node = &mut nodes[index];
        if let Some(name) = &changes.name {
            node.name = name.clone();
        }
        if let Some(parent_id) = changes.parent_id {
            node.parent_id = parent_id;
        }
        if let Some(type_id) = changes.type_id {
            node.business_structure_type_id = type_id;
        }
    }

    let paths = compute_paths(&nodes)?;
    if let Some(path) = first_duplicate(&paths) {
        return Err(Error::Conflict(format!("a node with path '{}' already exists", path)));
    }

    let links: Vec<(i64, Option<i64>)> = nodes.iter().map(|n| (n.id, n.parent_id)).collect();
    let placements: HashMap<i64, (i64, i64)> = rebuild(&links)?
        .into_iter()
        .map(|p| (p.id, (p.lft, p.rgt)))
        .collect();

    for node in nodes.iter_mut() {
        if let Some(path) = paths.get(&node.id) {
            node.path = path.clone();
        }
        if let Some((lft, rgt)) = placements.get(&node.id) {
            node.lft = *lft;
            node.rgt = *rgt;
        }
    }

    let changed: Vec<&BusinessStructureNode> = nodes
        .iter()
        .zip(original.iter())
        .filter(|(after, before)| {
            after.id == id
                || after.path != before.path
                || after.lft != before.lft
                || after.rgt != before.rgt
        })
        .map(|(after, _)| after)
        .collect();

    // Park changed paths first so intermediate rows never collide
    for node in &changed {
        sqlx::query("UPDATE business_structure_nodes SET path = ? WHERE id = ?")
            .bind(format!("{}tmp{}{}", PATH_SEPARATOR, PATH_SEPARATOR, node.id))
            .bind(node.id)
            .execute(&mut *tx)
            .await?;
    }

    let now = Utc::now();
    for node in &changed {
        sqlx::query(
            "UPDATE business_structure_nodes SET name = ?, parent_id = ?, \
             business_structure_type_id = ?, path = ?, lft = ?, rgt = ?, updated_at = ? \
             WHERE id = ? AND user_id = ?",
        )
        .bind(&node.name)
        .bind(node.parent_id)
        .bind(node.business_structure_type_id)
        .bind(&node.path)
        .bind(node.lft)
        .bind(node.rgt)
        .bind(now)
        .bind(node.id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }

    let affected_places = if moved {
        let mut related = related_ids(&original, id);
        related.extend(related_ids(&nodes, id));
        let related: Vec<i64> = related.into_iter().collect();
        places::linked_to_nodes(&mut *tx, &related).await?
    } else {
        Vec::new()
    };

    tx.commit().await?;
    debug!("Updated business structure node {} ({} rows rewritten)", id, changed.len());

    let mut node = nodes.swap_remove(index);
    node.updated_at = now;
    Ok(Some(NodeChange { node, affected_places }))
}

/// Delete a node with its whole subtree
///
/// Returns the places that were linked to the subtree or its ancestors, or
/// `None` when the node does not exist for this user.
pub async fn delete(pool: &SqlitePool, user_id: i64, id: i64) -> Result<Option<Vec<i64>>> {
    let mut tx = pool.begin().await?;

    let node: Option<BusinessStructureNode> = sqlx::query_as(&format!(
        "SELECT {} FROM business_structure_nodes WHERE id = ? AND user_id = ?",
        COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(node) = node else {
        return Ok(None);
    };

    let affected: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT l.known_place_id \
         FROM business_structure_node_known_place l \
         JOIN business_structure_nodes n ON n.id = l.business_structure_node_id \
         WHERE n.user_id = ? AND ((n.lft >= ? AND n.rgt <= ?) OR (n.lft < ? AND n.rgt > ?)) \
         ORDER BY l.known_place_id",
    )
    .bind(user_id)
    .bind(node.lft)
    .bind(node.rgt)
    .bind(node.lft)
    .bind(node.rgt)
    .fetch_all(&mut *tx)
    .await?;

    let removed = sqlx::query(
        "DELETE FROM business_structure_nodes WHERE user_id = ? AND lft >= ? AND rgt <= ?",
    )
    .bind(user_id)
    .bind(node.lft)
    .bind(node.rgt)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let width = node.rgt - node.lft + 1;
    sqlx::query(
        "UPDATE business_structure_nodes \
         SET lft = CASE WHEN lft > ? THEN lft - ? ELSE lft END, \
             rgt = CASE WHEN rgt > ? THEN rgt - ? ELSE rgt END \
         WHERE user_id = ? AND rgt > ?",
    )
    .bind(node.rgt)
    .bind(width)
    .bind(node.rgt)
    .bind(width)
    .bind(user_id)
    .bind(node.rgt)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    debug!("Deleted business structure node {} and {} descendants", id, removed.saturating_sub(1));
    Ok(Some(affected))
}

/// `parent_path/name`, or just `name` for roots
pub fn join_path(parent_path: Option<&str>, name: &str) -> String {
    match parent_path {
        Some(parent) => format!("{}{}{}", parent, PATH_SEPARATOR, name),
        None => name.to_string(),
    }
}

/// Full path of every node, computed from names and parent links
///
/// Nodes whose parent is missing are treated as roots.
pub fn compute_paths(nodes: &[BusinessStructureNode]) -> Result<HashMap<i64, String>> {
    let by_id: HashMap<i64, &BusinessStructureNode> = nodes.iter().map(|n| (n.id, n)).collect();
    let mut paths: HashMap<i64, String> = HashMap::with_capacity(nodes.len());

    for node in nodes {
        let mut chain = vec![node];
        let mut seen = HashSet::from([node.id]);
        let mut cursor = node.parent_id.and_then(|p| by_id.get(&p).copied());
        while let Some(parent) = cursor {
            if !seen.insert(parent.id) {
                return Err(NestedSetError::Cycle(node.id).into());
            }
            chain.push(parent);
            cursor = parent.parent_id.and_then(|p| by_id.get(&p).copied());
        }
        let names: Vec<&str> = chain.iter().rev().map(|n| n.name.as_str()).collect();
        paths.insert(node.id, names.join(PATH_SEPARATOR));
    }

    Ok(paths)
}

fn first_duplicate(paths: &HashMap<i64, String>) -> Option<&str> {
    let mut seen = HashSet::new();
    let mut sorted: Vec<(&i64, &String)> = paths.iter().collect();
    sorted.sort();
    sorted
        .into_iter()
        .find(|(_, path)| !seen.insert(path.as_str()))
        .map(|(_, path)| path.as_str())
}

/// The node, its descendants and its ancestors
fn related_ids(nodes: &[BusinessStructureNode], id: i64) -> HashSet<i64> {
    let Some(target) = nodes.iter().find(|n| n.id == id) else {
        return HashSet::new();
    };
    nodes
        .iter()
        .filter(|n| {
            (n.lft >= target.lft && n.rgt <= target.rgt) || is_ancestor(*n, target)
        })
        .map(|n| n.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, parent_id: Option<i64>, name: &str, lft: i64, rgt: i64) -> BusinessStructureNode {
        BusinessStructureNode {
            id,
            user_id: 1,
            business_structure_type_id: None,
            parent_id,
            name: name.to_string(),
            path: String::new(),
            lft,
            rgt,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    // Acme (1..8)
    // ├─ North (2..5)
    // │  └─ Depot (3..4)
    // └─ South (6..7)
    fn forest() -> Vec<BusinessStructureNode> {
        vec![
            node(1, None, "Acme", 1, 8),
            node(2, Some(1), "North", 2, 5),
            node(3, Some(2), "Depot", 3, 4),
            node(4, Some(1), "South", 6, 7),
        ]
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(None, "Acme"), "Acme");
        assert_eq!(join_path(Some("Acme/North"), "Depot"), "Acme/North/Depot");
    }

    #[test]
    fn test_compute_paths() {
        let paths = compute_paths(&forest()).unwrap();
        assert_eq!(paths[&1], "Acme");
        assert_eq!(paths[&3], "Acme/North/Depot");
        assert_eq!(paths[&4], "Acme/South");
    }

    #[test]
    fn test_compute_paths_after_move() {
        let mut nodes = forest();
        nodes[2].parent_id = Some(4);
        let paths = compute_paths(&nodes).unwrap();
        assert_eq!(paths[&3], "Acme/South/Depot");
    }

    #[test]
    fn test_compute_paths_detects_cycle() {
        let nodes = vec![node(1, Some(2), "A", 1, 2), node(2, Some(1), "B", 3, 4)];
        assert!(compute_paths(&nodes).is_err());
    }

    #[test]
    fn test_first_duplicate() {
        let mut nodes = forest();
        nodes[2].parent_id = Some(1);
        nodes[2].name = "South".to_string();
        let paths = compute_paths(&nodes).unwrap();
        assert_eq!(first_duplicate(&paths), Some("Acme/South"));

        assert_eq!(first_duplicate(&compute_paths(&forest()).unwrap()), None);
    }

    #[test]
    fn test_related_ids_covers_subtree_and_ancestors() {
        let nodes = forest();
        assert_eq!(related_ids(&nodes, 2), HashSet::from([1, 2, 3]));
        assert_eq!(related_ids(&nodes, 4), HashSet::from([1, 4]));
        assert!(related_ids(&nodes, 99).is_empty());
    }
}
