//! Change log and sync cursors.
//!
//! Every local mutation appends rows here inside its own transaction; the
//! sync engine pushes rows carrying the local node id and applies pulled
//! remote rows under field-level last-writer-wins. Comparing stamps with
//! strict `(ts_ms, node_id)` ordering makes re-application of an already
//! seen change a no-op, which is what makes interrupted syncs resumable.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};

pub const PUSH_CURSOR: &str = "last_pushed_seq";
pub const PULL_CURSOR: &str = "last_pulled_seq";

/// One field-level mutation, the unit of sync exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub seq: i64,
    pub entity: String,
    pub entity_id: String,
    pub field: String,
    pub value: Option<String>,
    pub ts_ms: u64,
    pub node_id: String,
}

pub(crate) fn record_change(
    conn: &Connection,
    entity: &str,
    entity_id: &str,
    field: &str,
    value: Option<&str>,
    ts_ms: u64,
    node_id: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO changes(entity, entity_id, field, value, ts_ms, node_id)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![entity, entity_id, field, value, ts_ms as i64, node_id],
    )?;
    Ok(())
}

impl Store {
    /// Read a sync cursor; absent means 0 (nothing exchanged yet).
    pub fn cursor(&self, key: &str) -> Result<i64, StoreError> {
        let value: Option<i64> = self
            .conn()
            .query_row("SELECT value FROM sync_state WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value.unwrap_or(0))
    }

    /// Changes authored by this node past `seq`, oldest first.
    pub fn local_changes_since(&self, seq: i64, limit: usize) -> Result<Vec<Change>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT seq, entity, entity_id, field, value, ts_ms, node_id
             FROM changes WHERE node_id = ?1 AND seq > ?2 ORDER BY seq LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![self.node_id, seq, limit as i64],
            row_to_change,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Advance the push cursor after the remote acknowledged a batch.
    pub fn mark_pushed(&mut self, seq: i64) -> Result<(), StoreError> {
        self.with_txn(|tx| {
            set_cursor(tx, PUSH_CURSOR, seq)?;
            Ok(())
        })
    }

    /// Apply a pulled batch and advance the pull cursor in one transaction,
    /// so a retry after interruption re-requests from a consistent point.
    /// Returns how many changes won their LWW comparison.
    pub fn apply_remote(&mut self, changes: &[Change], cursor: i64) -> Result<usize, StoreError> {
        self.with_txn(|tx| {
            let mut applied = 0;
            for change in changes {
                if lww_wins(tx, change)? {
                    apply_change(tx, change)?;
                    record_change(
                        tx,
                        &change.entity,
                        &change.entity_id,
                        &change.field,
                        change.value.as_deref(),
                        change.ts_ms,
                        &change.node_id,
                    )?;
                    applied += 1;
                }
            }
            set_cursor(tx, PULL_CURSOR, cursor)?;
            Ok(applied)
        })
    }
}

fn row_to_change(row: &rusqlite::Row<'_>) -> Result<Change, rusqlite::Error> {
    Ok(Change {
        seq: row.get(0)?,
        entity: row.get(1)?,
        entity_id: row.get(2)?,
        field: row.get(3)?,
        value: row.get(4)?,
        ts_ms: row.get::<_, i64>(5)? as u64,
        node_id: row.get(6)?,
    })
}

fn set_cursor(conn: &Connection, key: &str, value: i64) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_state(key, value) VALUES(?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Strict last-writer-wins: the incoming change applies only if its
/// `(ts_ms, node_id)` stamp is greater than the newest recorded stamp for
/// the same (entity_id, field). Equal stamps lose, so replays are no-ops.
fn lww_wins(conn: &Connection, change: &Change) -> Result<bool, rusqlite::Error> {
    let latest: Option<(i64, String)> = conn
        .query_row(
            "SELECT ts_ms, node_id FROM changes
             WHERE entity_id = ?1 AND field = ?2
             ORDER BY ts_ms DESC, node_id DESC LIMIT 1",
            params![change.entity_id, change.field],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(match latest {
        None => true,
        Some((ts, node)) => (change.ts_ms as i64, change.node_id.as_str()) > (ts, node.as_str()),
    })
}

fn apply_change(conn: &Connection, change: &Change) -> Result<(), StoreError> {
    match change.entity.as_str() {
        "issue" => {
            ensure_issue_stub(conn, &change.entity_id, change.ts_ms)?;
            // Column name comes from this fixed table, never from the wire.
            let column = match change.field.as_str() {
                "title" => "title",
                "kind" => "kind",
                "status" => "status",
                "assignee" => "assignee",
                other => {
                    tracing::warn!(field = other, "ignoring unknown issue field");
                    return Ok(());
                }
            };
            let sql = format!(
                "UPDATE issues SET {column} = ?1, updated_ms = MAX(updated_ms, ?2) WHERE id = ?3"
            );
            conn.execute(
                &sql,
                params![change.value, change.ts_ms as i64, change.entity_id],
            )?;
        }
        "label" => {
            let Some((issue_id, label)) = change.entity_id.split_once('/') else {
                tracing::warn!(id = %change.entity_id, "malformed label change");
                return Ok(());
            };
            ensure_issue_stub(conn, issue_id, change.ts_ms)?;
            if change.value.as_deref() == Some("true") {
                conn.execute(
                    "INSERT OR IGNORE INTO labels(issue_id, label) VALUES(?1, ?2)",
                    params![issue_id, label],
                )?;
            } else {
                conn.execute(
                    "DELETE FROM labels WHERE issue_id = ?1 AND label = ?2",
                    params![issue_id, label],
                )?;
            }
        }
        "note" => {
            let Some((issue_id, _)) = change.entity_id.split_once('/') else {
                tracing::warn!(id = %change.entity_id, "malformed note change");
                return Ok(());
            };
            ensure_issue_stub(conn, issue_id, change.ts_ms)?;
            conn.execute(
                "INSERT INTO notes(issue_id, content, created_ms) VALUES(?1, ?2, ?3)",
                params![
                    issue_id,
                    change.value.as_deref().unwrap_or_default(),
                    change.ts_ms as i64
                ],
            )?;
        }
        "dep" => {
            let parts: Vec<&str> = change.entity_id.splitn(3, '/').collect();
            let [from, to, kind] = parts.as_slice() else {
                tracing::warn!(id = %change.entity_id, "malformed dep change");
                return Ok(());
            };
            ensure_issue_stub(conn, from, change.ts_ms)?;
            ensure_issue_stub(conn, to, change.ts_ms)?;
            if change.value.as_deref() == Some("true") {
                conn.execute(
                    "INSERT OR IGNORE INTO deps(from_id, to_id, kind, created_ms)
                     VALUES(?1, ?2, ?3, ?4)",
                    params![from, to, kind, change.ts_ms as i64],
                )?;
            } else {
                conn.execute(
                    "DELETE FROM deps WHERE from_id = ?1 AND to_id = ?2 AND kind = ?3",
                    params![from, to, kind],
                )?;
            }
        }
        other => {
            tracing::warn!(entity = other, "ignoring unknown change entity");
        }
    }
    Ok(())
}

/// A remote change may arrive before the issue it touches; a stub row keeps
/// foreign keys satisfied and is filled in by later (or earlier-stamped)
/// field changes.
fn ensure_issue_stub(conn: &Connection, id: &str, ts_ms: u64) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO issues(id, title, kind, status, assignee, created_ms, updated_ms)
         VALUES(?1, '', 'task', 'todo', NULL, ?2, ?2)",
        params![id, ts_ms as i64],
    )?;
    Ok(())
}
