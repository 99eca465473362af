//! Workspace resolution: working directory -> canonical database path.
//!
//! The canonical path is the normalized identity of a physical database.
//! Everything downstream (registry keys, socket locations, daemon records)
//! derives from it, so the normalization here is what lets two working
//! directories share one daemon.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::WorkspaceConfig;

/// Database file name inside the resolved workspace directory.
pub const DB_FILE: &str = "issues.db";

/// Resolve the canonical database path for a working directory.
///
/// With a `workspace` override the directory is expanded (leading `~`,
/// relative paths anchored at the working dir), created if missing and
/// symlink-normalized; without one the database lives in
/// `<working_dir>/.tick`. Identical `workspace` values resolve
/// string-equal regardless of the invoking directory.
pub fn resolve(working_dir: &Path, config: &WorkspaceConfig) -> Result<PathBuf, ResolverError> {
    let dir = match &config.workspace {
        Some(raw) => expand(raw, working_dir),
        None => working_dir.join(".tick"),
    };

    fs::create_dir_all(&dir).map_err(|source| ResolverError::Create {
        path: dir.clone(),
        source,
    })?;

    let canonical = fs::canonicalize(&dir).map_err(|source| ResolverError::Canonicalize {
        path: dir.clone(),
        source,
    })?;

    let meta = fs::metadata(&canonical).map_err(|source| ResolverError::Canonicalize {
        path: canonical.clone(),
        source,
    })?;
    if meta.permissions().readonly() {
        return Err(ResolverError::NotWritable { path: canonical });
    }

    Ok(canonical.join(DB_FILE))
}

fn expand(raw: &Path, working_dir: &Path) -> PathBuf {
    if let Ok(stripped) = raw.strip_prefix("~") {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        return home.join(stripped);
    }
    if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        working_dir.join(raw)
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ResolverError {
    #[error("cannot create workspace directory {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot canonicalize workspace directory {path:?}: {source}")]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workspace directory {path:?} is not writable")]
    NotWritable { path: PathBuf },

    #[error("cannot determine working directory: {0}")]
    WorkingDir(#[source] std::io::Error),
}
