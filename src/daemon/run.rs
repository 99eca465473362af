//! Daemon process body: registry acquisition, control socket, engine thread.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Sender;
use signal_hook::consts::{SIGINT, SIGTERM};

use super::ipc::{self, Request, Response, ResponsePayload};
use super::registry::{self, RegistryError, RegistryLock};
use super::{DaemonState, Shared};
use crate::config::SyncConfig;
use crate::paths;
use crate::store::Store;
use crate::sync::{run_engine, EngineCmd, SyncEngine};

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const CONN_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the daemon for `db_path` until stopped.
///
/// Losing the registry race to a live daemon is a quiet success: the
/// caller's goal (a daemon serves this path) is already met. A stale
/// record from a crashed daemon is cleared and acquisition retried once.
pub fn run_daemon(db_path: &Path, remote: Option<String>) -> crate::Result<()> {
    fs::create_dir_all(paths::registry_dir(db_path))
        .map_err(RegistryError::Io)?;
    init_logging(db_path);

    let lock = match RegistryLock::acquire(db_path) {
        Ok(lock) => lock,
        Err(RegistryError::Held { record, .. }) => {
            let live = record
                .as_ref()
                .is_some_and(|r| registry::process_alive(r.pid));
            if live {
                tracing::info!("another daemon already serves this path, exiting");
                return Ok(());
            }
            registry::reap_stale(db_path, record.as_deref());
            RegistryLock::acquire(db_path)?
        }
        Err(err) => return Err(err.into()),
    };
    tracing::info!(pid = lock.record().pid, db = %db_path.display(), "daemon started");

    let store = Store::open(db_path)?;
    store.verify_integrity()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in [SIGTERM, SIGINT] {
        signal_hook::flag::register(sig, Arc::clone(&shutdown))
            .map_err(RegistryError::Io)?;
    }

    let shared = Arc::new(Shared::new());
    let engine = match remote {
        Some(url) => {
            let engine = SyncEngine::new(
                store,
                url,
                SyncConfig::default(),
                Arc::clone(&shared),
                Arc::clone(&shutdown),
            );
            let (tx, rx) = crossbeam::channel::unbounded();
            let handle = std::thread::Builder::new()
                .name("sync-engine".to_string())
                .spawn(move || run_engine(engine, rx))
                .map_err(RegistryError::Io)?;
            Some((tx, handle))
        }
        None => {
            shared.set_state(DaemonState::Disconnected);
            None
        }
    };

    let socket = paths::socket_path(db_path);
    let _ = fs::remove_file(&socket);
    let listener = UnixListener::bind(&socket).map_err(RegistryError::Io)?;
    restrict_socket(&socket)?;
    listener.set_nonblocking(true).map_err(RegistryError::Io)?;

    let cmd_tx = engine.as_ref().map(|(tx, _)| tx.clone());
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                // One thread per connection: a stalled client must never
                // hold up another client's status request.
                let shared = Arc::clone(&shared);
                let shutdown = Arc::clone(&shutdown);
                let cmd_tx = cmd_tx.clone();
                let db_path = db_path.to_path_buf();
                std::thread::spawn(move || {
                    handle_connection(stream, &db_path, &shared, &shutdown, cmd_tx.as_ref());
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                tracing::warn!(error = %err, "control socket accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }

    shared.set_state(DaemonState::Stopping);
    if let Some((tx, handle)) = engine {
        let _ = tx.send(EngineCmd::Shutdown);
        drop(tx);
        let _ = handle.join();
    }
    let _ = fs::remove_file(&socket);
    lock.release()?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Serve one control connection: a single request/response exchange.
fn handle_connection(
    stream: UnixStream,
    db_path: &Path,
    shared: &Shared,
    shutdown: &AtomicBool,
    cmd_tx: Option<&Sender<EngineCmd>>,
) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(CONN_IO_TIMEOUT));
    let _ = stream.set_write_timeout(Some(CONN_IO_TIMEOUT));

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => return,
        Ok(_) => {}
        Err(err) => {
            tracing::debug!(error = %err, "control read failed");
            return;
        }
    }

    let response = match ipc::decode_request(&line) {
        Ok(req) => respond(&req, db_path, shared, shutdown, cmd_tx),
        Err(err) => Response::err("bad_request", err.to_string()),
    };

    let Ok(bytes) = ipc::encode_response(&response) else {
        return;
    };
    let mut stream = reader.into_inner();
    if let Err(err) = stream.write_all(&bytes) {
        tracing::debug!(error = %err, "control write failed");
    }
}

fn respond(
    req: &Request,
    db_path: &Path,
    shared: &Shared,
    shutdown: &AtomicBool,
    cmd_tx: Option<&Sender<EngineCmd>>,
) -> Response {
    match req {
        Request::Ping => Response::ok(ResponsePayload::Pong),
        // Answered from shared state, never queued behind a sync.
        Request::Status => Response::ok(ResponsePayload::Status {
            state: shared.state(),
            pid: std::process::id(),
            db_path: PathBuf::from(db_path),
        }),
        Request::TriggerSync => {
            let Some(tx) = cmd_tx else {
                return Response::err("no_remote", "daemon is running without a remote");
            };
            if !shared.begin_sync() {
                // Idempotent: an in-flight sync satisfies the request.
                return Response::ok(ResponsePayload::Sync { started: false });
            }
            if tx.send(EngineCmd::Sync).is_err() {
                shared.end_sync();
                return Response::err("engine_gone", "sync engine is not running");
            }
            Response::ok(ResponsePayload::Sync { started: true })
        }
        Request::Stop => {
            shared.set_state(DaemonState::Stopping);
            shutdown.store(true, Ordering::SeqCst);
            Response::ok(ResponsePayload::Stopping)
        }
    }
}

fn init_logging(db_path: &Path) {
    let Ok(file) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths::log_path(db_path))
    else {
        return;
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .try_init();
}

fn restrict_socket(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(RegistryError::Io)?;
    Ok(())
}
