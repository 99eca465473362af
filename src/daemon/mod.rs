//! Daemon: one long-lived process per canonical database path.
//!
//! Owns the remote connection and the sync engine, and serves a small
//! control channel (trigger-sync / status / stop) over a Unix socket scoped
//! to the canonical path.

pub mod ipc;
pub mod registry;
pub mod run;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

pub use ipc::{send_request, IpcError, Request, Response};
pub use registry::{ensure_daemon, stop, DaemonRecord, DaemonStatus, RegistryError, SpawnError};
pub use run::run_daemon;

/// Connection/lifecycle state of the daemon.
///
/// `Disconnected ⇄ Connected` is driven by remote reachability; `Stopping`
/// is entered only by an explicit stop request or a fatal local error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Starting,
    Disconnected,
    Connected,
    Stopping,
}

/// State shared between the control channel and the sync engine.
///
/// `Status` requests read this directly so they never queue behind an
/// in-flight sync.
#[derive(Debug)]
pub struct Shared {
    state: Mutex<DaemonState>,
    sync_in_flight: AtomicBool,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DaemonState::Starting),
            sync_in_flight: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> DaemonState {
        *self.state.lock().expect("daemon state lock poisoned")
    }

    pub fn set_state(&self, state: DaemonState) {
        *self.state.lock().expect("daemon state lock poisoned") = state;
    }

    /// Try to claim the sync slot. Returns false if a sync is in flight.
    pub fn begin_sync(&self) -> bool {
        !self.sync_in_flight.swap(true, Ordering::SeqCst)
    }

    pub fn end_sync(&self) {
        self.sync_in_flight.store(false, Ordering::SeqCst);
    }

    pub fn sync_in_flight(&self) -> bool {
        self.sync_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}
