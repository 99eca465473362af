//! Sync engine: pushes the local change log to the remote and applies
//! pulled remote changes, resuming from durable cursors.
//!
//! Runs on its own thread inside the daemon. Connection loss never kills
//! the engine; it drops the client, reports `Disconnected`, and retries
//! with capped exponential backoff. Shutdown is honored only between
//! transactions, so an interrupted sync leaves cursors consistent and the
//! next run picks up exactly where this one stopped.

pub mod remote;

pub use remote::{normalize_url, ConnectionError, RemoteClient, RemoteReply, RemoteRequest};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::config::SyncConfig;
use crate::daemon::{DaemonState, Shared};
use crate::error::Error;
use crate::store::{Store, PULL_CURSOR, PUSH_CURSOR};

/// Changes exchanged per round trip.
const BATCH_LIMIT: usize = 500;
/// Poll interval while connected and idle.
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Commands from the control channel to the engine thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCmd {
    Sync,
    Shutdown,
}

pub struct SyncEngine {
    store: Store,
    remote_url: String,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
    client: Option<RemoteClient>,
    backoff: SyncConfig,
    retry_delay: Duration,
}

impl SyncEngine {
    pub fn new(
        store: Store,
        remote_url: String,
        backoff: SyncConfig,
        shared: Arc<Shared>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let retry_delay = Duration::from_millis(backoff.backoff_base_ms);
        Self {
            store,
            remote_url,
            shared,
            shutdown,
            client: None,
            backoff,
            retry_delay,
        }
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Establish the remote connection if absent. Failure is quiet: the
    /// state goes (or stays) `Disconnected` and the retry delay doubles.
    fn ensure_connected(&mut self) {
        if self.client.is_some() {
            return;
        }
        match RemoteClient::connect(&self.remote_url, self.store.node_id()) {
            Ok(client) => {
                tracing::info!(
                    remote = %self.remote_url,
                    remote_node = client.remote_node(),
                    "connected to remote"
                );
                self.client = Some(client);
                self.shared.set_state(DaemonState::Connected);
                self.retry_delay = Duration::from_millis(self.backoff.backoff_base_ms);
                // Catch up immediately after (re)connecting.
                if self.shared.begin_sync() {
                    self.sync_once();
                }
            }
            Err(err) => {
                tracing::debug!(remote = %self.remote_url, error = %err, "remote unreachable");
                self.shared.set_state(DaemonState::Disconnected);
                self.retry_delay = Duration::from_millis(
                    (self.retry_delay.as_millis() as u64 * 2).min(self.backoff.backoff_max_ms),
                );
            }
        }
    }

    /// One full push-then-pull cycle. Always clears the in-flight flag.
    fn sync_once(&mut self) {
        let result = self.run_sync();
        self.shared.end_sync();
        match result {
            Ok(()) => {}
            Err(Error::Connection(err)) => {
                tracing::warn!(error = %err, "remote connection lost during sync");
                self.client = None;
                self.shared.set_state(DaemonState::Disconnected);
                self.retry_delay = Duration::from_millis(self.backoff.backoff_base_ms);
            }
            Err(err) => {
                // Local failure; the connection is still good, the next
                // sync resumes from the durable cursors.
                tracing::error!(error = %err, "sync failed");
            }
        }
    }

    fn run_sync(&mut self) -> crate::Result<()> {
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };

        // Push: local changes past the push cursor, in batches. The cursor
        // advances only after the remote acknowledges, so a crash between
        // send and ack re-sends a batch the remote applies idempotently.
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            let cursor = self.store.cursor(PUSH_CURSOR)?;
            let batch = self.store.local_changes_since(cursor, BATCH_LIMIT)?;
            let Some(last_seq) = batch.last().map(|c| c.seq) else {
                break;
            };
            let accepted = client.push(&batch)?;
            tracing::debug!(count = batch.len(), accepted, "pushed changes");
            self.store.mark_pushed(last_seq)?;
        }

        // Pull: remote changes past the pull cursor. Application and cursor
        // advance share one transaction.
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            let since = self.store.cursor(PULL_CURSOR)?;
            let (changes, cursor) = client.pull(since, BATCH_LIMIT)?;
            if changes.is_empty() && cursor <= since {
                break;
            }
            let fetched = changes.len();
            let applied = self.store.apply_remote(&changes, cursor)?;
            tracing::debug!(fetched, applied, "pulled changes");
            if fetched < BATCH_LIMIT {
                break;
            }
        }
        Ok(())
    }
}

/// Engine thread body. Exits on `Shutdown`, a dropped command channel, or
/// the shared shutdown flag.
pub fn run_engine(mut engine: SyncEngine, cmds: Receiver<EngineCmd>) {
    loop {
        if engine.stopping() {
            break;
        }
        engine.ensure_connected();

        let wait = if engine.client.is_some() {
            IDLE_WAIT
        } else {
            engine.retry_delay
        };
        match cmds.recv_timeout(wait) {
            Ok(EngineCmd::Sync) => engine.sync_once(),
            Ok(EngineCmd::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    engine.shared.end_sync();
    tracing::debug!("sync engine stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IssueKind;
    use crate::store::Change;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    /// In-process remote serving one connection: acknowledges pushes into
    /// `pushed_tx` and serves `pull_batch` exactly once.
    fn spawn_fake_remote(
        pull_batch: Vec<Change>,
        pushed_tx: crossbeam::channel::Sender<Vec<Change>>,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut writer = stream;
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    return;
                }
                let req: RemoteRequest = serde_json::from_str(&line).expect("request");
                let reply = match req {
                    RemoteRequest::Hello { .. } => RemoteReply::Hello {
                        node_id: "fake-remote".to_string(),
                    },
                    RemoteRequest::Push { changes } => {
                        let accepted = changes.len();
                        pushed_tx.send(changes).expect("record push");
                        RemoteReply::Pushed { accepted }
                    }
                    RemoteRequest::Pull { since, .. } => RemoteReply::Changes {
                        changes: pull_batch
                            .iter()
                            .filter(|c| c.seq > since)
                            .cloned()
                            .collect(),
                        cursor: pull_batch.last().map(|c| c.seq).unwrap_or(since).max(since),
                    },
                };
                let mut json = serde_json::to_string(&reply).expect("reply");
                json.push('\n');
                writer.write_all(json.as_bytes()).expect("write");
            }
        });
        addr
    }

    fn engine_for(store: Store, url: &str) -> SyncEngine {
        SyncEngine::new(
            store,
            url.to_string(),
            SyncConfig::default(),
            Arc::new(Shared::new()),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn sync_pushes_local_changes_and_applies_pulled_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = Store::open(&dir.path().join("issues.db")).expect("open");
        store
            .create_issue("local work", IssueKind::Task, None, &[])
            .expect("create");

        let remote_change = Change {
            seq: 1,
            entity: "issue".to_string(),
            entity_id: "rx-1".to_string(),
            field: "title".to_string(),
            value: Some("remote work".to_string()),
            ts_ms: 100,
            node_id: "node-remote".to_string(),
        };
        let (pushed_tx, pushed_rx) = crossbeam::channel::unbounded();
        let addr = spawn_fake_remote(vec![remote_change], pushed_tx);

        let mut engine = engine_for(store, &addr);
        engine.ensure_connected();
        assert_eq!(engine.shared.state(), DaemonState::Connected);

        // ensure_connected already ran the catch-up sync.
        let pushed = pushed_rx.try_recv().expect("push recorded");
        assert!(pushed.iter().any(|c| c.field == "title"));
        assert!(engine.store.cursor(PUSH_CURSOR).expect("cursor") > 0);
        assert_eq!(engine.store.cursor(PULL_CURSOR).expect("cursor"), 1);
        assert_eq!(
            engine.store.get_issue("rx-1").expect("remote issue").title,
            "remote work"
        );
        assert!(!engine.shared.sync_in_flight());
    }

    #[test]
    fn repeated_sync_sends_nothing_new() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = Store::open(&dir.path().join("issues.db")).expect("open");
        store
            .create_issue("once", IssueKind::Task, None, &[])
            .expect("create");

        let (pushed_tx, pushed_rx) = crossbeam::channel::unbounded();
        let addr = spawn_fake_remote(Vec::new(), pushed_tx);

        let mut engine = engine_for(store, &addr);
        engine.ensure_connected();
        assert!(pushed_rx.try_recv().is_ok());

        assert!(engine.shared.begin_sync());
        engine.sync_once();
        assert!(pushed_rx.try_recv().is_err(), "cursor prevents re-push");
    }

    #[test]
    fn unreachable_remote_backs_off_and_stays_disconnected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("issues.db")).expect("open");
        let mut engine = engine_for(store, "127.0.0.1:1");

        let base = engine.retry_delay;
        engine.ensure_connected();
        assert_eq!(engine.shared.state(), DaemonState::Disconnected);
        assert!(engine.retry_delay > base);

        engine.ensure_connected();
        let doubled = engine.retry_delay;
        assert!(doubled >= base * 2);
        assert!(doubled <= Duration::from_millis(engine.backoff.backoff_max_ms));
    }

    #[test]
    fn shutdown_command_stops_the_engine_thread() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("issues.db")).expect("open");
        let engine = engine_for(store, "127.0.0.1:1");

        let (tx, rx) = crossbeam::channel::unbounded();
        let handle = std::thread::spawn(move || run_engine(engine, rx));
        tx.send(EngineCmd::Shutdown).expect("send");
        handle.join().expect("engine thread exits");
    }
}
