//! Daemon registry: cross-process arbitration of "who owns path P".
//!
//! The authority is a lock file created with `O_CREAT|O_EXCL` in a
//! directory keyed by the canonical database path, holding the owning
//! daemon's record as JSON. Exclusive creation is the single-winner
//! primitive; a record whose pid fails the liveness probe is stale and
//! treated as absent.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ipc::{self, Request};
use super::DaemonState;
use crate::paths;
use crate::store::now_ms;

const GUARD_STALE: Duration = Duration::from_secs(10);
const SPAWN_DEADLINE: Duration = Duration::from_secs(15);
const STOP_DEADLINE: Duration = Duration::from_secs(5);
const KILL_DEADLINE: Duration = Duration::from_secs(2);

/// The registry's published fact that `pid` is the authoritative daemon
/// for `db_path`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRecord {
    pub db_path: PathBuf,
    pub pid: u32,
    pub socket: PathBuf,
    pub started_at_ms: u64,
    pub version: String,
}

impl DaemonRecord {
    pub fn new(db_path: PathBuf) -> Self {
        let socket = paths::socket_path(&db_path);
        Self {
            db_path,
            pid: std::process::id(),
            socket,
            started_at_ms: now_ms(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Held by the daemon process for its lifetime; removing the file on drop
/// is best-effort, stale-record cleanup covers the SIGKILL case.
#[derive(Debug)]
pub struct RegistryLock {
    path: PathBuf,
    record: DaemonRecord,
    released: bool,
}

impl RegistryLock {
    /// Atomically publish ourselves as the daemon for `db_path`.
    ///
    /// Exactly one of N concurrent callers wins; the rest observe `Held`
    /// with the winner's record.
    pub fn acquire(db_path: &Path) -> Result<Self, RegistryError> {
        ensure_dir(&paths::registry_dir(db_path))?;
        let path = paths::lock_path(db_path);
        reject_symlink(&path)?;

        let record = DaemonRecord::new(db_path.to_path_buf());

        let mut file = match open_new_lock_file(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let (existing, meta_error) = match read_record(db_path) {
                    Ok(existing) => (existing.map(Box::new), None),
                    Err(err) => (None, Some(err.to_string())),
                };
                return Err(RegistryError::Held {
                    path,
                    record: existing,
                    meta_error,
                });
            }
            Err(err) => return Err(RegistryError::Io(err)),
        };

        write_record(&mut file, &path, &record)?;
        set_file_permissions(&path, 0o600)?;

        Ok(Self {
            path,
            record,
            released: false,
        })
    }

    pub fn record(&self) -> &DaemonRecord {
        &self.record
    }

    pub fn release(mut self) -> Result<(), RegistryError> {
        if !self.released {
            fs::remove_file(&self.path)?;
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Read the published record for `db_path`, if any.
pub fn read_record(db_path: &Path) -> Result<Option<DaemonRecord>, RegistryError> {
    let path = paths::lock_path(db_path);
    match fs::symlink_metadata(&path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(RegistryError::Symlink { path }),
        Ok(_) => {
            let bytes = fs::read(&path)?;
            let record = serde_json::from_slice(&bytes)
                .map_err(|source| RegistryError::Corrupt { path, source })?;
            Ok(Some(record))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RegistryError::Io(err)),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DaemonStatus {
    NotRunning,
    Running { pid: u32 },
    Connected { pid: u32 },
}

/// Probe the registry for `db_path`.
///
/// A dead recorded pid is treated as `NotRunning` and its artifacts are
/// cleared opportunistically, so the registry self-heals after a crash.
pub fn status(db_path: &Path) -> Result<DaemonStatus, RegistryError> {
    let Some(record) = read_record(db_path)? else {
        return Ok(DaemonStatus::NotRunning);
    };
    if !process_alive(record.pid) {
        reap_stale(db_path, Some(&record));
        return Ok(DaemonStatus::NotRunning);
    }
    match ipc::request_payload(db_path, &Request::Status) {
        Ok(ipc::ResponsePayload::Status {
            state: DaemonState::Connected,
            pid,
            ..
        }) => Ok(DaemonStatus::Connected { pid }),
        _ => Ok(DaemonStatus::Running { pid: record.pid }),
    }
}

/// Stop the daemon for `db_path`. Idempotent: succeeds as a no-op when
/// nothing is running. Returns whether a daemon was actually stopped.
pub fn stop(db_path: &Path) -> Result<bool, RegistryError> {
    let Some(record) = read_record(db_path)? else {
        return Ok(false);
    };
    if !process_alive(record.pid) {
        reap_stale(db_path, Some(&record));
        return Ok(false);
    }

    // Ask nicely first; the daemon finishes its current transaction.
    let _ = ipc::send_request(db_path, &Request::Stop);

    if !wait_for_exit(record.pid, STOP_DEADLINE) {
        tracing::warn!(pid = record.pid, "daemon ignored stop request, killing");
        kill_process(record.pid);
        wait_for_exit(record.pid, KILL_DEADLINE);
    }
    // A graceful exit removed its own record; after SIGKILL this reaps it.
    reap_stale(db_path, Some(&record));
    Ok(true)
}

/// Spawn-or-attach: make sure a daemon serves `db_path` and return its pid.
///
/// If a live daemon answers a ping we attach to it. Otherwise one client
/// takes the short-lived spawn guard and launches the daemon; everyone
/// polls for the winner's record. The authoritative race is the daemon's
/// own `RegistryLock::acquire`, so extra spawned processes exit quietly.
pub fn ensure_daemon(db_path: &Path, remote_url: Option<&str>) -> Result<u32, SpawnError> {
    ensure_dir(&paths::registry_dir(db_path)).map_err(SpawnError::Registry)?;

    if let Some(pid) = attached_pid(db_path) {
        return Ok(pid);
    }

    let spawn_lock = paths::spawn_lock_path(db_path);
    maybe_remove_stale_guard(&spawn_lock);
    let mut we_spawned = try_create(&spawn_lock);
    if we_spawned {
        spawn_daemon_process(db_path, remote_url).inspect_err(|_| {
            let _ = fs::remove_file(&spawn_lock);
        })?;
    }

    let deadline = Instant::now() + SPAWN_DEADLINE;
    let mut backoff = Duration::from_millis(50);
    loop {
        if let Some(pid) = attached_pid(db_path) {
            if we_spawned {
                let _ = fs::remove_file(&spawn_lock);
            }
            return Ok(pid);
        }
        if !we_spawned {
            // If the spawner died, take over.
            maybe_remove_stale_guard(&spawn_lock);
            if try_create(&spawn_lock) {
                we_spawned = true;
                spawn_daemon_process(db_path, remote_url).inspect_err(|_| {
                    let _ = fs::remove_file(&spawn_lock);
                })?;
            }
        }
        if Instant::now() >= deadline {
            if we_spawned {
                let _ = fs::remove_file(&spawn_lock);
            }
            return Err(SpawnError::Timeout(paths::socket_path(db_path)));
        }
        std::thread::sleep(backoff);
        backoff = (backoff * 2).min(Duration::from_millis(400));
    }
}

fn attached_pid(db_path: &Path) -> Option<u32> {
    let record = read_record(db_path).ok().flatten()?;
    if !process_alive(record.pid) {
        reap_stale(db_path, Some(&record));
        return None;
    }
    match ipc::request_payload(db_path, &Request::Ping) {
        Ok(_) => Some(record.pid),
        Err(_) => None,
    }
}

pub(crate) fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 probes existence without delivering anything.
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

fn kill_process(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else { return };
    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid),
        nix::sys::signal::Signal::SIGKILL,
    );
}

fn wait_for_exit(pid: u32, deadline: Duration) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if !process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    !process_alive(pid)
}

/// Remove the artifacts of a dead daemon without racing a live one.
///
/// Plain unlink after a liveness probe would be check-then-act: between the
/// probe and the unlink another healer can clear the stale record and a new
/// daemon can win `create_new`, and the delayed unlink would then destroy
/// the live winner's record. Cleanup therefore runs under a short-lived
/// guard file and re-reads the record inside it: only the exact record the
/// caller observed dead (or a still-unreadable one, when `observed` is
/// `None`) is removed. While the guard is held and the old file exists no
/// acquire can succeed, so the unlink cannot hit a fresh publication.
///
/// Returns whether the stale artifacts are gone.
pub(crate) fn reap_stale(db_path: &Path, observed: Option<&DaemonRecord>) -> bool {
    let guard = paths::reap_lock_path(db_path);
    maybe_remove_stale_guard(&guard);
    if !try_create(&guard) {
        // Another healer is reaping; let it.
        return false;
    }
    let reaped = match (read_record(db_path), observed) {
        (Ok(None), _) => true,
        (Ok(Some(current)), Some(observed))
            if current == *observed && !process_alive(current.pid) =>
        {
            let _ = fs::remove_file(paths::lock_path(db_path));
            let _ = fs::remove_file(paths::socket_path(db_path));
            true
        }
        (Err(RegistryError::Corrupt { .. }), None) => {
            let _ = fs::remove_file(paths::lock_path(db_path));
            let _ = fs::remove_file(paths::socket_path(db_path));
            true
        }
        _ => false,
    };
    let _ = fs::remove_file(&guard);
    reaped
}

fn try_create(path: &Path) -> bool {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .is_ok()
}

fn maybe_remove_stale_guard(path: &Path) {
    if let Ok(meta) = fs::metadata(path) {
        if let Ok(modified) = meta.modified() {
            if let Ok(age) = modified.elapsed() {
                if age > GUARD_STALE {
                    let _ = fs::remove_file(path);
                }
            }
        }
    }
}

fn spawn_daemon_process(db_path: &Path, remote_url: Option<&str>) -> Result<(), SpawnError> {
    let exe = std::env::current_exe().map_err(SpawnError::Spawn)?;
    let mut cmd = Command::new(exe);
    cmd.arg("daemon").arg("run").arg("--db").arg(db_path);
    if let Some(url) = remote_url {
        cmd.arg("--remote").arg(url);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd.spawn().map_err(SpawnError::Spawn)?;
    Ok(())
}

fn ensure_dir(path: &Path) -> Result<(), RegistryError> {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                return Err(RegistryError::Symlink {
                    path: path.to_path_buf(),
                });
            }
            if !meta.is_dir() {
                return Err(RegistryError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("expected directory at {path:?}"),
                )));
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path)?;
        }
        Err(err) => return Err(RegistryError::Io(err)),
    }
    set_dir_permissions(path, 0o700)?;
    Ok(())
}

fn reject_symlink(path: &Path) -> Result<(), RegistryError> {
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            return Err(RegistryError::Symlink {
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

fn open_new_lock_file(path: &Path) -> io::Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
    }
    #[cfg(not(unix))]
    {
        fs::OpenOptions::new().write(true).create_new(true).open(path)
    }
}

fn write_record(
    file: &mut fs::File,
    path: &Path,
    record: &DaemonRecord,
) -> Result<(), RegistryError> {
    serde_json::to_writer(&mut *file, record).map_err(|source| RegistryError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    file.sync_all()?;
    Ok(())
}

fn set_dir_permissions(path: &Path, mode: u32) -> Result<(), RegistryError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

fn set_file_permissions(path: &Path, mode: u32) -> Result<(), RegistryError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("daemon record already held at {path:?}")]
    Held {
        path: PathBuf,
        record: Option<Box<DaemonRecord>>,
        meta_error: Option<String>,
    },

    #[error("registry path is a symlink: {path:?}")]
    Symlink { path: PathBuf },

    #[error("daemon record corrupted at {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("registry io error: {0}")]
    Io(#[from] io::Error),
}

/// The daemon process failed to start or publish its control channel.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SpawnError {
    #[error("failed to start daemon process: {0}")]
    Spawn(#[source] io::Error),

    #[error("timed out waiting for daemon control channel at {0:?}")]
    Timeout(PathBuf),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
