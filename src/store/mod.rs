//! Local store: durable, transactional storage of issues, edges, labels,
//! notes and the sync change log.
//!
//! Every mutating operation runs as one SQLite transaction; on failure or
//! process death mid-operation none of its effects are visible. Writers
//! retry on `SQLITE_BUSY` with bounded backoff instead of surfacing
//! contention to the user.

mod changelog;
mod issues;
mod schema;

pub use changelog::{Change, PULL_CURSOR, PUSH_CURSOR};
pub use issues::ListFilter;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use thiserror::Error;

use crate::model::{DepKind, StateError};

const BUSY_TIMEOUT_MS: u64 = 2_000;
const BUSY_RETRY_LIMIT: u32 = 6;
const BUSY_RETRY_BASE_MS: u64 = 25;
const BUSY_RETRY_MAX_MS: u64 = 400;

pub const DEFAULT_PREFIX: &str = "tk";

#[derive(Debug)]
pub struct Store {
    conn: Connection,
    node_id: String,
    prefix: String,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    ///
    /// Applies schema migrations and mints the store's node id on first
    /// open. Safe to call after an abrupt termination; WAL recovery is
    /// SQLite's job and needs no manual step.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.pragma_update(None, "synchronous", "normal")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;

        schema::migrate(&conn)?;

        let fresh_node = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES('node_id', ?1)",
            [&fresh_node],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES('prefix', ?1)",
            [DEFAULT_PREFIX],
        )?;

        let node_id = meta_get(&conn, "node_id")?
            .ok_or_else(|| StoreError::Meta("node_id missing after init".to_string()))?;
        let prefix = meta_get(&conn, "prefix")?
            .ok_or_else(|| StoreError::Meta("prefix missing after init".to_string()))?;

        Ok(Self {
            conn,
            node_id,
            prefix,
        })
    }

    /// Stable identifier of this replica, used as the LWW tie-breaker.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Change the issue-id prefix (recorded in store meta).
    pub fn set_prefix(&mut self, prefix: &str) -> Result<(), StoreError> {
        let prefix = prefix.trim();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StoreError::Meta(format!(
                "prefix must be alphanumeric, got {prefix:?}"
            )));
        }
        self.with_txn(|tx| {
            meta_set(tx, "prefix", prefix)?;
            Ok(())
        })?;
        self.prefix = prefix.to_string();
        Ok(())
    }

    /// Run `PRAGMA integrity_check`. The recovery primitive after a crash.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let verdict: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if verdict == "ok" {
            Ok(())
        } else {
            Err(StoreError::Corrupt(verdict))
        }
    }

    /// Execute one mutation as a single immediate transaction, retrying the
    /// whole transaction on busy with capped exponential backoff.
    pub(crate) fn with_txn<T>(
        &mut self,
        mut f: impl FnMut(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut delay = Duration::from_millis(BUSY_RETRY_BASE_MS);
        let mut attempts = 0u32;
        loop {
            match run_txn(&mut self.conn, &mut f) {
                Err(StoreError::Sqlite(ref err)) if is_busy(err) && attempts < BUSY_RETRY_LIMIT => {
                    attempts += 1;
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_millis(BUSY_RETRY_MAX_MS));
                }
                other => return other,
            }
        }
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn run_txn<T>(
    conn: &mut Connection,
    f: &mut impl FnMut(&Transaction<'_>) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

pub(crate) fn meta_get(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .optional()
}

pub(crate) fn meta_set(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO meta(key, value) VALUES(?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

/// Wall-clock milliseconds; the timestamp attached to every mutation.
pub(crate) fn now_ms() -> u64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("issue not found: {0}")]
    NotFound(String),

    #[error("dependency {from} -{kind}-> {to} already exists")]
    DuplicateDep {
        from: String,
        to: String,
        kind: DepKind,
    },

    #[error("store integrity check failed: {0}")]
    Corrupt(String),

    #[error("store metadata invalid: {0}")]
    Meta(String),

    #[error(transparent)]
    State(#[from] StateError),
}
