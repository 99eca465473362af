//! Domain model: issues, the workflow state machine, dependency edges.

mod dep;
mod issue;

pub use dep::{dep_tree, is_blocked, DepEdge, DepKind, TreeRow};
pub use issue::{transition, Issue, IssueKind, Note, StateError, Status};
