//! Workspace configuration loading and persistence.
//!
//! Each working directory may carry a `.tick/config.toml`. Its *value* (not
//! its location) decides which physical database the directory addresses:
//! two directories configured with the same `workspace` share one database
//! and therefore one daemon.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Optional shared-workspace override. When set, the database lives
    /// under this directory instead of `<working_dir>/.tick`.
    pub workspace: Option<PathBuf>,
    pub remote: Option<RemoteConfig>,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote sync endpoint, `host:port` (optionally `tcp://host:port`).
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 250,
            backoff_max_ms: 5_000,
        }
    }
}

impl WorkspaceConfig {
    pub fn remote_url(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.url.as_str())
    }
}

pub fn config_path(working_dir: &Path) -> PathBuf {
    working_dir.join(".tick").join("config.toml")
}

/// Load the config for a working directory. A missing file is not an
/// error; it means defaults (local-only, per-directory database).
pub fn load(working_dir: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let path = config_path(working_dir);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(WorkspaceConfig::default());
        }
        Err(err) => {
            return Err(ConfigError::Read {
                path,
                source: err,
            });
        }
    };
    toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

pub fn write_config(path: &Path, cfg: &WorkspaceConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let contents = toml::to_string_pretty(cfg).map_err(ConfigError::Render)?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let dir = path.parent().ok_or_else(|| ConfigError::Invalid {
        reason: "config path missing parent directory".to_string(),
    })?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|source| ConfigError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    fs::write(temp.path(), data).map_err(|source| ConfigError::Write {
        path: temp.path().to_path_buf(),
        source,
    })?;
    temp.persist(path).map_err(|err| ConfigError::Write {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write config at {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[source] toml::ser::Error),

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}
