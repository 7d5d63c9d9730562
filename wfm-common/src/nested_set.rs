//! Nested-set tree math
//!
//! Business structure nodes are stored with `lft`/`rgt` bounds so that
//! ancestor and descendant lookups are plain range comparisons. The functions
//! here are pure: repositories load the bounds, ask questions, and write back
//! whatever [`rebuild`] computes.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NestedSetError {
    /// Following parent links from this node never reaches a root
    #[error("parent chain of node {0} forms a cycle")]
    Cycle(i64),

    /// Target parent is the node itself or one of its descendants
    #[error("cannot move node {node} under {target}, which is inside its own subtree")]
    MoveIntoSubtree { node: i64, target: i64 },

    #[error("node {0} does not exist")]
    UnknownNode(i64),
}

/// Anything that carries nested-set bounds
pub trait NestedNode {
    fn id(&self) -> i64;
    fn parent_id(&self) -> Option<i64>;
    fn lft(&self) -> i64;
    fn rgt(&self) -> i64;
}

/// Minimal bounds record, used by the conflict detector and in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeBounds {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub lft: i64,
    pub rgt: i64,
}

impl NestedNode for NodeBounds {
    fn id(&self) -> i64 {
        self.id
    }
    fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }
    fn lft(&self) -> i64 {
        self.lft
    }
    fn rgt(&self) -> i64 {
        self.rgt
    }
}

/// Bounds assigned to one node by [`rebuild`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub id: i64,
    pub lft: i64,
    pub rgt: i64,
    pub depth: u32,
}

/// `ancestor` strictly contains `node`
pub fn is_ancestor<A: NestedNode, B: NestedNode>(ancestor: &A, node: &B) -> bool {
    ancestor.lft() < node.lft() && ancestor.rgt() > node.rgt()
}

/// `descendant` is strictly inside `node`
pub fn is_descendant<A: NestedNode, B: NestedNode>(descendant: &A, node: &B) -> bool {
    descendant.lft() > node.lft() && descendant.rgt() < node.rgt()
}

/// Ids of every ancestor of `id`, outermost first
pub fn ancestors_of<N: NestedNode>(nodes: &[N], id: i64) -> Result<Vec<i64>, NestedSetError> {
    let target = find(nodes, id)?;
    let mut found: Vec<&N> = nodes.iter().filter(|n| is_ancestor(*n, target)).collect();
    found.sort_by_key(|n| n.lft());
    Ok(found.into_iter().map(|n| n.id()).collect())
}

/// Ids of every descendant of `id`, in tree (lft) order
pub fn descendants_of<N: NestedNode>(nodes: &[N], id: i64) -> Result<Vec<i64>, NestedSetError> {
    let target = find(nodes, id)?;
    let mut found: Vec<&N> = nodes.iter().filter(|n| is_descendant(*n, target)).collect();
    found.sort_by_key(|n| n.lft());
    Ok(found.into_iter().map(|n| n.id()).collect())
}

fn find<N: NestedNode>(nodes: &[N], id: i64) -> Result<&N, NestedSetError> {
    nodes
        .iter()
        .find(|n| n.id() == id)
        .ok_or(NestedSetError::UnknownNode(id))
}

/// Reject a re-parent that would put `node` inside its own subtree
///
/// Works from parent links rather than bounds so it stays correct even when
/// the stored bounds are stale.
pub fn check_move(
    parents: &HashMap<i64, Option<i64>>,
    node: i64,
    new_parent: Option<i64>,
) -> Result<(), NestedSetError> {
    if !parents.contains_key(&node) {
        return Err(NestedSetError::UnknownNode(node));
    }
    let Some(target) = new_parent else {
        return Ok(());
    };
    if !parents.contains_key(&target) {
        return Err(NestedSetError::UnknownNode(target));
    }

    let mut seen = HashSet::new();
    let mut cursor = Some(target);
    while let Some(current) = cursor {
        if current == node {
            return Err(NestedSetError::MoveIntoSubtree { node, target });
        }
        if !seen.insert(current) {
            return Err(NestedSetError::Cycle(current));
        }
        cursor = parents.get(&current).copied().flatten();
    }
    Ok(())
}

/// Recompute bounds for a whole forest from parent links
///
/// Roots (no parent, or a parent outside the input) and siblings are laid out
/// in ascending id order. Bounds start at 1 and are contiguous across roots.
pub fn rebuild(nodes: &[(i64, Option<i64>)]) -> Result<Vec<Placement>, NestedSetError> {
    let ids: HashSet<i64> = nodes.iter().map(|(id, _)| *id).collect();
    let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut roots = Vec::new();

    for (id, parent) in nodes {
        match parent {
            Some(p) if ids.contains(p) => children.entry(*p).or_default().push(*id),
            _ => roots.push(*id),
        }
    }
    roots.sort_unstable();
    for list in children.values_mut() {
        list.sort_unstable();
    }

    enum Step {
        Enter(i64, u32),
        Exit(i64),
    }

    let mut placements: HashMap<i64, Placement> = HashMap::with_capacity(nodes.len());
    let mut counter = 1;
    let mut stack: Vec<Step> = roots.iter().rev().map(|id| Step::Enter(*id, 0)).collect();

    while let Some(step) = stack.pop() {
        match step {
            Step::Enter(id, depth) => {
                placements.insert(id, Placement { id, lft: counter, rgt: 0, depth });
                counter += 1;
                stack.push(Step::Exit(id));
                if let Some(kids) = children.get(&id) {
                    stack.extend(kids.iter().rev().map(|kid| Step::Enter(*kid, depth + 1)));
                }
            }
            Step::Exit(id) => {
                if let Some(p) = placements.get_mut(&id) {
                    p.rgt = counter;
                }
                counter += 1;
            }
        }
    }

    if placements.len() != ids.len() {
        let stuck = nodes
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| !placements.contains_key(id))
            .min()
            .unwrap_or_default();
        return Err(NestedSetError::Cycle(stuck));
    }

    let mut out: Vec<Placement> = placements.into_values().collect();
    out.sort_by_key(|p| p.lft);
    Ok(out)
}

/// Owned tree view, children ordered by `lft`
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode<T> {
    #[serde(flatten)]
    pub item: T,
    pub children: Vec<TreeNode<T>>,
}

/// Assemble a forest from a flat node list
pub fn build_tree<T: NestedNode>(items: Vec<T>) -> Vec<TreeNode<T>> {
    let ids: HashSet<i64> = items.iter().map(|n| n.id()).collect();
    let mut by_parent: HashMap<Option<i64>, Vec<T>> = HashMap::new();
    for item in items {
        let key = item.parent_id().filter(|p| ids.contains(p));
        by_parent.entry(key).or_default().push(item);
    }
    for list in by_parent.values_mut() {
        list.sort_by_key(|n| n.lft());
    }

    fn assemble<T: NestedNode>(
        parent: Option<i64>,
        by_parent: &mut HashMap<Option<i64>, Vec<T>>,
    ) -> Vec<TreeNode<T>> {
        let level = by_parent.remove(&parent).unwrap_or_default();
        level
            .into_iter()
            .map(|item| {
                let children = assemble(Some(item.id()), by_parent);
                TreeNode { item, children }
            })
            .collect()
    }

    assemble(None, &mut by_parent)
}
