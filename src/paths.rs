//! Data-directory and daemon-registry path helpers.
//!
//! Registry artifacts for a database are keyed by a digest of its canonical
//! path, never by the invoking working directory, so every working directory
//! sharing a workspace lands on the same record.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Base directory for persistent data (daemon registry, logs).
///
/// Uses `TICK_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/tick` or
/// `~/.local/share/tick`.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = thread_local_data_dir_override() {
        return dir;
    }

    if let Ok(dir) = std::env::var("TICK_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("tick")
}

#[doc(hidden)]
pub struct DataDirOverride {
    prev: Option<PathBuf>,
}

impl DataDirOverride {
    pub fn new(path: Option<PathBuf>) -> Self {
        let prev = DATA_DIR_OVERRIDE.with(|cell| cell.replace(path));
        Self { prev }
    }
}

impl Drop for DataDirOverride {
    fn drop(&mut self) {
        let prev = self.prev.take();
        DATA_DIR_OVERRIDE.with(|cell| {
            cell.replace(prev);
        });
    }
}

/// Redirect `data_dir()` for the current thread. Test use only.
#[doc(hidden)]
pub fn override_data_dir_for_tests(path: Option<PathBuf>) -> DataDirOverride {
    DataDirOverride::new(path)
}

fn thread_local_data_dir_override() -> Option<PathBuf> {
    DATA_DIR_OVERRIDE.with(|cell| cell.borrow().clone())
}

thread_local! {
    static DATA_DIR_OVERRIDE: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

/// Deterministic registry key for a canonical database path.
pub fn registry_key(db_path: &Path) -> String {
    let digest = Sha256::digest(db_path.as_os_str().as_encoded_bytes());
    digest
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Registry directory for a canonical database path.
pub fn registry_dir(db_path: &Path) -> PathBuf {
    data_dir().join("daemons").join(registry_key(db_path))
}

/// Authoritative daemon record / lock file.
pub fn lock_path(db_path: &Path) -> PathBuf {
    registry_dir(db_path).join("daemon.lock")
}

/// Control-channel socket for the daemon owning this database.
pub fn socket_path(db_path: &Path) -> PathBuf {
    registry_dir(db_path).join("daemon.sock")
}

/// Short-lived guard taken by the client that spawns the daemon.
pub fn spawn_lock_path(db_path: &Path) -> PathBuf {
    registry_dir(db_path).join("spawn.lock")
}

/// Short-lived guard serializing stale-record cleanup.
pub fn reap_lock_path(db_path: &Path) -> PathBuf {
    registry_dir(db_path).join("reap.lock")
}

/// Daemon log file.
pub fn log_path(db_path: &Path) -> PathBuf {
    registry_dir(db_path).join("daemon.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_key_is_deterministic_and_path_keyed() {
        let a = registry_key(Path::new("/srv/shared/issues.db"));
        let b = registry_key(Path::new("/srv/shared/issues.db"));
        let c = registry_key(Path::new("/srv/other/issues.db"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn data_dir_override_applies_per_thread() {
        let _guard = override_data_dir_for_tests(Some(PathBuf::from("/tmp/tick-test")));
        assert_eq!(data_dir(), PathBuf::from("/tmp/tick-test"));
        let dir = registry_dir(Path::new("/srv/shared/issues.db"));
        assert!(dir.starts_with("/tmp/tick-test/daemons"));
    }
}
