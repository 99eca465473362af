//! Issue, label, note and dependency operations.
//!
//! Each public mutation is one transaction; the matching change-log rows
//! are recorded inside it so a sync never observes half an operation.

use rusqlite::{params, Connection, OptionalExtension};

use super::changelog::record_change;
use super::{meta_get, meta_set, now_ms, Store, StoreError};
use crate::model::{transition, DepEdge, DepKind, Issue, IssueKind, Note, Status};

/// Filters for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<Status>,
    pub assignee: Option<String>,
    pub label: Option<String>,
}

impl Store {
    pub fn create_issue(
        &mut self,
        title: &str,
        kind: IssueKind,
        assignee: Option<&str>,
        labels: &[String],
    ) -> Result<Issue, StoreError> {
        let node = self.node_id.clone();
        let prefix = self.prefix.clone();
        self.with_txn(|tx| {
            let n: i64 = meta_get(tx, "next_issue")?
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            let id = format!("{prefix}-{n}");
            meta_set(tx, "next_issue", &(n + 1).to_string())?;

            let ts = now_ms();
            tx.execute(
                "INSERT INTO issues(id, title, kind, status, assignee, created_ms, updated_ms)
                 VALUES(?1, ?2, ?3, 'todo', ?4, ?5, ?5)",
                params![id, title, kind.as_str(), assignee, ts as i64],
            )?;
            record_change(tx, "issue", &id, "title", Some(title), ts, &node)?;
            record_change(tx, "issue", &id, "kind", Some(kind.as_str()), ts, &node)?;
            record_change(tx, "issue", &id, "status", Some("todo"), ts, &node)?;
            if let Some(assignee) = assignee {
                record_change(tx, "issue", &id, "assignee", Some(assignee), ts, &node)?;
            }

            let mut labels_out = Vec::new();
            for label in labels {
                tx.execute(
                    "INSERT OR IGNORE INTO labels(issue_id, label) VALUES(?1, ?2)",
                    params![id, label],
                )?;
                let key = format!("{id}/{label}");
                record_change(tx, "label", &key, "present", Some("true"), ts, &node)?;
                labels_out.push(label.clone());
            }
            labels_out.sort();

            Ok(Issue {
                id,
                title: title.to_string(),
                kind,
                status: Status::Todo,
                assignee: assignee.map(str::to_string),
                labels: labels_out,
                created_ms: ts,
                updated_ms: ts,
            })
        })
    }

    pub fn get_issue(&self, id: &str) -> Result<Issue, StoreError> {
        let mut issue = issue_row(self.conn(), id)?;
        issue.labels = issue_labels(self.conn(), id)?;
        Ok(issue)
    }

    pub fn list_issues(&self, filter: &ListFilter) -> Result<Vec<Issue>, StoreError> {
        let mut sql = String::from(
            "SELECT id, title, kind, status, assignee, created_ms, updated_ms FROM issues",
        );
        let mut clauses = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            args.push(status.as_str().to_string());
        }
        if let Some(assignee) = &filter.assignee {
            clauses.push("assignee = ?");
            args.push(assignee.clone());
        }
        if let Some(label) = &filter.label {
            clauses.push("id IN (SELECT issue_id FROM labels WHERE label = ?)");
            args.push(label.clone());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_ms, id");

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            let mut issue = row?;
            issue.labels = issue_labels(self.conn(), &issue.id)?;
            issues.push(issue);
        }
        Ok(issues)
    }

    pub fn count_issues(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// `start`: todo -> in_progress. Assigns `actor` if unassigned.
    pub fn start_issue(&mut self, id: &str, actor: &str) -> Result<Issue, StoreError> {
        let node = self.node_id.clone();
        self.with_txn(|tx| {
            let issue = issue_row(tx, id)?;
            let next = transition::start(issue.status)?;
            let ts = now_ms();
            set_status(tx, id, next, ts, &node)?;
            if issue.assignee.is_none() {
                tx.execute(
                    "UPDATE issues SET assignee = ?1 WHERE id = ?2",
                    params![actor, id],
                )?;
                record_change(tx, "issue", id, "assignee", Some(actor), ts, &node)?;
            }
            finished_issue(tx, id)
        })
    }

    /// `done`: in_progress -> done.
    pub fn finish_issue(&mut self, id: &str) -> Result<Issue, StoreError> {
        let node = self.node_id.clone();
        self.with_txn(|tx| {
            let issue = issue_row(tx, id)?;
            let next = transition::done(issue.status)?;
            let ts = now_ms();
            set_status(tx, id, next, ts, &node)?;
            finished_issue(tx, id)
        })
    }

    /// `close`: todo/in_progress/done -> closed, reason mandatory.
    pub fn close_issue(&mut self, id: &str, reason: &str) -> Result<Issue, StoreError> {
        let node = self.node_id.clone();
        self.with_txn(|tx| {
            let issue = issue_row(tx, id)?;
            let next = transition::close(issue.status, reason)?;
            let ts = now_ms();
            set_status(tx, id, next, ts, &node)?;
            insert_note(tx, id, &format!("closed: {reason}"), ts, &node)?;
            finished_issue(tx, id)
        })
    }

    /// `reopen`: in_progress -> todo freely; done/closed -> todo with reason.
    pub fn reopen_issue(&mut self, id: &str, reason: Option<&str>) -> Result<Issue, StoreError> {
        let node = self.node_id.clone();
        self.with_txn(|tx| {
            let issue = issue_row(tx, id)?;
            let next = transition::reopen(issue.status, reason)?;
            let ts = now_ms();
            set_status(tx, id, next, ts, &node)?;
            if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
                insert_note(tx, id, &format!("reopened: {reason}"), ts, &node)?;
            }
            finished_issue(tx, id)
        })
    }

    pub fn add_label(&mut self, id: &str, label: &str) -> Result<(), StoreError> {
        let node = self.node_id.clone();
        self.with_txn(|tx| {
            issue_row(tx, id)?;
            let ts = now_ms();
            tx.execute(
                "INSERT OR IGNORE INTO labels(issue_id, label) VALUES(?1, ?2)",
                params![id, label],
            )?;
            touch(tx, id, ts)?;
            let key = format!("{id}/{label}");
            record_change(tx, "label", &key, "present", Some("true"), ts, &node)?;
            Ok(())
        })
    }

    pub fn remove_label(&mut self, id: &str, label: &str) -> Result<(), StoreError> {
        let node = self.node_id.clone();
        self.with_txn(|tx| {
            issue_row(tx, id)?;
            let ts = now_ms();
            tx.execute(
                "DELETE FROM labels WHERE issue_id = ?1 AND label = ?2",
                params![id, label],
            )?;
            touch(tx, id, ts)?;
            let key = format!("{id}/{label}");
            record_change(tx, "label", &key, "present", Some("false"), ts, &node)?;
            Ok(())
        })
    }

    pub fn add_note(&mut self, id: &str, content: &str) -> Result<Note, StoreError> {
        let node = self.node_id.clone();
        self.with_txn(|tx| {
            issue_row(tx, id)?;
            let ts = now_ms();
            insert_note(tx, id, content, ts, &node)?;
            touch(tx, id, ts)?;
            Ok(Note {
                content: content.to_string(),
                created_ms: ts,
            })
        })
    }

    pub fn notes(&self, id: &str) -> Result<Vec<Note>, StoreError> {
        issue_row(self.conn(), id)?;
        let mut stmt = self.conn().prepare(
            "SELECT content, created_ms FROM notes WHERE issue_id = ?1 ORDER BY created_ms, id",
        )?;
        let rows = stmt.query_map([id], |row| {
            Ok(Note {
                content: row.get(0)?,
                created_ms: row.get::<_, i64>(1)? as u64,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Add a typed edge. Cycles are allowed here and handled at traversal.
    pub fn add_dep(&mut self, from: &str, to: &str, kind: DepKind) -> Result<(), StoreError> {
        let node = self.node_id.clone();
        self.with_txn(|tx| {
            issue_row(tx, from)?;
            issue_row(tx, to)?;
            let ts = now_ms();
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO deps(from_id, to_id, kind, created_ms)
                 VALUES(?1, ?2, ?3, ?4)",
                params![from, to, kind.as_str(), ts as i64],
            )?;
            if inserted == 0 {
                return Err(StoreError::DuplicateDep {
                    from: from.to_string(),
                    to: to.to_string(),
                    kind,
                });
            }
            let key = format!("{from}/{to}/{kind}");
            record_change(tx, "dep", &key, "present", Some("true"), ts, &node)?;
            Ok(())
        })
    }

    pub fn deps(&self) -> Result<Vec<DepEdge>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT from_id, to_id, kind FROM deps ORDER BY created_ms, from_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut edges = Vec::new();
        for row in rows {
            let (from, to, kind) = row?;
            let kind = DepKind::parse(&kind).map_err(StoreError::Meta)?;
            edges.push(DepEdge { from, to, kind });
        }
        Ok(edges)
    }
}

fn row_to_issue(row: &rusqlite::Row<'_>) -> Result<Issue, rusqlite::Error> {
    let kind: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(Issue {
        id: row.get(0)?,
        title: row.get(1)?,
        kind: IssueKind::parse(&kind).unwrap_or(IssueKind::Task),
        status: Status::parse(&status).unwrap_or(Status::Todo),
        assignee: row.get(4)?,
        labels: Vec::new(),
        created_ms: row.get::<_, i64>(5)? as u64,
        updated_ms: row.get::<_, i64>(6)? as u64,
    })
}

fn issue_row(conn: &Connection, id: &str) -> Result<Issue, StoreError> {
    conn.query_row(
        "SELECT id, title, kind, status, assignee, created_ms, updated_ms
         FROM issues WHERE id = ?1",
        [id],
        row_to_issue,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(id.to_string()))
}

fn issue_labels(conn: &Connection, id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT label FROM labels WHERE issue_id = ?1 ORDER BY label")?;
    let rows = stmt.query_map([id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn finished_issue(conn: &Connection, id: &str) -> Result<Issue, StoreError> {
    let mut issue = issue_row(conn, id)?;
    issue.labels = issue_labels(conn, id)?;
    Ok(issue)
}

fn set_status(
    conn: &Connection,
    id: &str,
    status: Status,
    ts: u64,
    node: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE issues SET status = ?1, updated_ms = ?2 WHERE id = ?3",
        params![status.as_str(), ts as i64, id],
    )?;
    record_change(conn, "issue", id, "status", Some(status.as_str()), ts, node)?;
    Ok(())
}

fn touch(conn: &Connection, id: &str, ts: u64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE issues SET updated_ms = ?1 WHERE id = ?2",
        params![ts as i64, id],
    )?;
    Ok(())
}

fn insert_note(
    conn: &Connection,
    id: &str,
    content: &str,
    ts: u64,
    node: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO notes(issue_id, content, created_ms) VALUES(?1, ?2, ?3)",
        params![id, content, ts as i64],
    )?;
    let key = format!("{id}/{}", uuid::Uuid::new_v4());
    record_change(conn, "note", &key, "content", Some(content), ts, node)?;
    Ok(())
}
