//! Dependency edges and cycle-safe graph traversal.
//!
//! Cycles are representable (edge creation does not reject them), so every
//! traversal walks with an explicit visited set and reports a cycle instead
//! of descending forever.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::issue::Status;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepKind {
    Blocks,
    Contains,
}

impl DepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DepKind::Blocks => "blocks",
            DepKind::Contains => "contains",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_lowercase().as_str() {
            "blocks" => Ok(DepKind::Blocks),
            "contains" => Ok(DepKind::Contains),
            other => Err(format!("invalid dependency kind `{other}`")),
        }
    }
}

impl fmt::Display for DepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed edge `from -> to`, unique by (from, to, kind).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepEdge {
    pub from: String,
    pub to: String,
    pub kind: DepKind,
}

/// One row of a rendered dependency tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TreeRow {
    pub id: String,
    pub depth: usize,
    pub kind: Option<DepKind>,
    /// Node was already visited on this walk; traversal stopped here.
    pub cycle: bool,
}

/// Walk the outgoing edges from `root` depth-first.
///
/// Revisited nodes are emitted once more with `cycle = true` and not
/// descended into, so a cyclic graph yields a finite, reportable tree.
pub fn dep_tree(root: &str, edges: &[DepEdge]) -> Vec<TreeRow> {
    let mut rows = Vec::new();
    let mut visited = HashSet::new();
    walk(root, None, 0, edges, &mut visited, &mut rows);
    rows
}

fn walk(
    id: &str,
    kind: Option<DepKind>,
    depth: usize,
    edges: &[DepEdge],
    visited: &mut HashSet<String>,
    rows: &mut Vec<TreeRow>,
) {
    if !visited.insert(id.to_string()) {
        rows.push(TreeRow {
            id: id.to_string(),
            depth,
            kind,
            cycle: true,
        });
        return;
    }
    rows.push(TreeRow {
        id: id.to_string(),
        depth,
        kind,
        cycle: false,
    });
    for edge in edges.iter().filter(|e| e.from == id) {
        walk(&edge.to, Some(edge.kind), depth + 1, edges, visited, rows);
    }
}

/// An issue is blocked when an incoming `blocks` edge originates from an
/// issue that is not yet done/closed. Derived, never stored.
pub fn is_blocked<F>(id: &str, edges: &[DepEdge], status_of: F) -> bool
where
    F: Fn(&str) -> Option<Status>,
{
    edges
        .iter()
        .filter(|e| e.kind == DepKind::Blocks && e.to == id)
        .any(|e| status_of(&e.from).is_some_and(|s| !s.is_settled()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from: &str, to: &str, kind: DepKind) -> DepEdge {
        DepEdge {
            from: from.to_string(),
            to: to.to_string(),
            kind,
        }
    }

    #[test]
    fn tree_walk_terminates_on_cycles_and_reports_them() {
        let edges = vec![
            edge("a", "b", DepKind::Blocks),
            edge("b", "a", DepKind::Blocks),
        ];
        let rows = dep_tree("a", &edges);
        assert_eq!(rows.len(), 3);
        assert!(!rows[0].cycle);
        assert!(!rows[1].cycle);
        assert!(rows[2].cycle);
        assert_eq!(rows[2].id, "a");
        assert_eq!(rows[2].depth, 2);
    }

    #[test]
    fn tree_walk_covers_both_edge_kinds() {
        let edges = vec![
            edge("epic", "a", DepKind::Contains),
            edge("epic", "b", DepKind::Contains),
            edge("a", "b", DepKind::Blocks),
        ];
        let rows = dep_tree("epic", &edges);
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["epic", "a", "b", "b"]);
        assert!(rows[3].cycle, "second visit of b is reported, not expanded");
    }

    #[test]
    fn blocked_derivation_ignores_settled_blockers() {
        let edges = vec![
            edge("a", "b", DepKind::Blocks),
            edge("epic", "b", DepKind::Contains),
        ];
        let open = |_: &str| Some(Status::InProgress);
        let settled = |_: &str| Some(Status::Done);

        assert!(is_blocked("b", &edges, open));
        assert!(!is_blocked("b", &edges, settled));
        assert!(!is_blocked("a", &edges, open), "no incoming blocks edge");
    }
}
