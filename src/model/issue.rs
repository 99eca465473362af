//! Issue types and the workflow state machine.
//!
//! Each transition is a distinct operation with its own input contract:
//! `close` cannot be called without a reason, `reopen` decides per source
//! state whether one is required. There is no generic status setter.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Task,
    Bug,
    Feature,
    Epic,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueKind::Task => "task",
            IssueKind::Bug => "bug",
            IssueKind::Feature => "feature",
            IssueKind::Epic => "epic",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_lowercase().as_str() {
            "task" => Ok(IssueKind::Task),
            "bug" => Ok(IssueKind::Bug),
            "feature" => Ok(IssueKind::Feature),
            "epic" => Ok(IssueKind::Epic),
            other => Err(format!("invalid issue kind `{other}`")),
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Todo,
    InProgress,
    Done,
    Closed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::InProgress => "in_progress",
            Status::Done => "done",
            Status::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_lowercase().as_str() {
            "todo" => Ok(Status::Todo),
            "in_progress" | "in-progress" => Ok(Status::InProgress),
            "done" => Ok(Status::Done),
            "closed" => Ok(Status::Closed),
            other => Err(format!("invalid status `{other}`")),
        }
    }

    /// A settled issue no longer blocks its dependents.
    pub fn is_settled(self) -> bool {
        matches!(self, Status::Done | Status::Closed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub kind: IssueKind,
    pub status: Status,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub created_ms: u64,
    pub updated_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub content: String,
    pub created_ms: u64,
}

/// Invalid workflow operation. A normal user-facing rejection, not a defect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("cannot {attempted} an issue that is {current}")]
    InvalidTransition {
        current: Status,
        attempted: &'static str,
    },

    #[error("{attempted} from {current} requires a reason")]
    ReasonRequired {
        current: Status,
        attempted: &'static str,
    },
}

/// Workflow transitions. Pure functions over the current status so the
/// guard table is testable without a store.
pub mod transition {
    use super::{StateError, Status};

    /// `todo -> in_progress`.
    pub fn start(current: Status) -> Result<Status, StateError> {
        match current {
            Status::Todo => Ok(Status::InProgress),
            other => Err(StateError::InvalidTransition {
                current: other,
                attempted: "start",
            }),
        }
    }

    /// `in_progress -> done`.
    pub fn done(current: Status) -> Result<Status, StateError> {
        match current {
            Status::InProgress => Ok(Status::Done),
            other => Err(StateError::InvalidTransition {
                current: other,
                attempted: "done",
            }),
        }
    }

    /// `todo | in_progress | done -> closed`. The reason is part of the
    /// input contract; an empty one is rejected.
    pub fn close(current: Status, reason: &str) -> Result<Status, StateError> {
        if reason.trim().is_empty() {
            return Err(StateError::ReasonRequired {
                current,
                attempted: "close",
            });
        }
        match current {
            Status::Todo | Status::InProgress | Status::Done => Ok(Status::Closed),
            other => Err(StateError::InvalidTransition {
                current: other,
                attempted: "close",
            }),
        }
    }

    /// `in_progress -> todo` without a reason; `done | closed -> todo`
    /// only with one.
    pub fn reopen(current: Status, reason: Option<&str>) -> Result<Status, StateError> {
        let has_reason = reason.map(str::trim).is_some_and(|r| !r.is_empty());
        match current {
            Status::InProgress => Ok(Status::Todo),
            Status::Done | Status::Closed if has_reason => Ok(Status::Todo),
            Status::Done | Status::Closed => Err(StateError::ReasonRequired {
                current,
                attempted: "reopen",
            }),
            other => Err(StateError::InvalidTransition {
                current: other,
                attempted: "reopen",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::transition::*;
    use super::*;

    #[test]
    fn start_only_from_todo() {
        assert_eq!(start(Status::Todo), Ok(Status::InProgress));
        for from in [Status::InProgress, Status::Done, Status::Closed] {
            assert_eq!(
                start(from),
                Err(StateError::InvalidTransition {
                    current: from,
                    attempted: "start",
                })
            );
        }
    }

    #[test]
    fn done_only_from_in_progress() {
        assert_eq!(done(Status::InProgress), Ok(Status::Done));
        for from in [Status::Todo, Status::Done, Status::Closed] {
            assert!(done(from).is_err());
        }
    }

    #[test]
    fn close_requires_a_reason() {
        assert_eq!(close(Status::Todo, "wontfix"), Ok(Status::Closed));
        assert_eq!(close(Status::InProgress, "dup"), Ok(Status::Closed));
        assert_eq!(close(Status::Done, "shipped"), Ok(Status::Closed));
        assert_eq!(
            close(Status::Todo, "  "),
            Err(StateError::ReasonRequired {
                current: Status::Todo,
                attempted: "close",
            })
        );
        assert!(close(Status::Closed, "again").is_err());
    }

    #[test]
    fn reopen_reason_depends_on_source_state() {
        assert_eq!(reopen(Status::InProgress, None), Ok(Status::Todo));
        assert_eq!(
            reopen(Status::Done, None),
            Err(StateError::ReasonRequired {
                current: Status::Done,
                attempted: "reopen",
            })
        );
        assert_eq!(reopen(Status::Done, Some("regression")), Ok(Status::Todo));
        assert_eq!(reopen(Status::Closed, Some("not fixed")), Ok(Status::Todo));
        assert!(reopen(Status::Todo, Some("already open")).is_err());
    }

    #[test]
    fn kind_and_status_parse_roundtrip() {
        for kind in [IssueKind::Task, IssueKind::Bug, IssueKind::Feature, IssueKind::Epic] {
            assert_eq!(IssueKind::parse(kind.as_str()), Ok(kind));
        }
        for status in [Status::Todo, Status::InProgress, Status::Done, Status::Closed] {
            assert_eq!(Status::parse(status.as_str()), Ok(status));
        }
        assert!(Status::parse("abandoned").is_err());
    }
}
