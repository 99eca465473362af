//! Remote sync wire protocol and client.
//!
//! Newline-delimited JSON over TCP. The conversation opens with a `hello`
//! exchange, then any number of `push`/`pull` round trips on the same
//! connection.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::Change;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RemoteRequest {
    Hello { node_id: String },
    Push { changes: Vec<Change> },
    Pull { since: i64, limit: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum RemoteReply {
    Hello { node_id: String },
    Pushed { accepted: usize },
    Changes { changes: Vec<Change>, cursor: i64 },
    Error { message: String },
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("cannot resolve remote address {0:?}")]
    Resolve(String),

    #[error("remote IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote protocol error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("remote closed the connection")]
    Disconnected,

    #[error("unexpected reply: {0}")]
    Protocol(String),

    #[error("remote rejected request: {0}")]
    Remote(String),
}

/// Accept `host:port` with an optional `tcp://` scheme prefix.
pub fn normalize_url(url: &str) -> &str {
    url.strip_prefix("tcp://").unwrap_or(url)
}

/// A live connection to the sync remote. One per daemon; the engine drops
/// it on any error and reconnects with backoff.
#[derive(Debug)]
pub struct RemoteClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    remote_node: String,
}

impl RemoteClient {
    pub fn connect(url: &str, node_id: &str) -> Result<Self, ConnectionError> {
        let addr = normalize_url(url)
            .to_socket_addrs()
            .map_err(|_| ConnectionError::Resolve(url.to_string()))?
            .next()
            .ok_or_else(|| ConnectionError::Resolve(url.to_string()))?;

        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        stream.set_nodelay(true)?;

        let writer = stream.try_clone()?;
        let mut client = Self {
            reader: BufReader::new(stream),
            writer,
            remote_node: String::new(),
        };

        match client.round_trip(&RemoteRequest::Hello {
            node_id: node_id.to_string(),
        })? {
            RemoteReply::Hello { node_id } => client.remote_node = node_id,
            other => {
                return Err(ConnectionError::Protocol(format!(
                    "expected hello, got {other:?}"
                )))
            }
        }
        Ok(client)
    }

    pub fn remote_node(&self) -> &str {
        &self.remote_node
    }

    /// Send a batch of local changes. Returns how many the remote accepted.
    pub fn push(&mut self, changes: &[Change]) -> Result<usize, ConnectionError> {
        match self.round_trip(&RemoteRequest::Push {
            changes: changes.to_vec(),
        })? {
            RemoteReply::Pushed { accepted } => Ok(accepted),
            other => Err(ConnectionError::Protocol(format!(
                "expected pushed, got {other:?}"
            ))),
        }
    }

    /// Fetch remote changes past `since`, capped at `limit`, together with
    /// the remote cursor to resume from.
    pub fn pull(&mut self, since: i64, limit: usize) -> Result<(Vec<Change>, i64), ConnectionError> {
        match self.round_trip(&RemoteRequest::Pull { since, limit })? {
            RemoteReply::Changes { changes, cursor } => Ok((changes, cursor)),
            other => Err(ConnectionError::Protocol(format!(
                "expected changes, got {other:?}"
            ))),
        }
    }

    fn round_trip(&mut self, req: &RemoteRequest) -> Result<RemoteReply, ConnectionError> {
        let mut json = serde_json::to_string(req)?;
        json.push('\n');
        self.writer.write_all(json.as_bytes())?;
        self.writer.flush()?;

        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Err(ConnectionError::Disconnected);
        }
        match serde_json::from_str(&line)? {
            RemoteReply::Error { message } => Err(ConnectionError::Remote(message)),
            reply => Ok(reply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// Minimal in-process remote: answers hello, acknowledges pushes, and
    /// serves a canned pull batch.
    fn spawn_fake_remote(pull_batch: Vec<Change>) -> String {
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
                    RemoteRequest::Push { changes } => RemoteReply::Pushed {
                        accepted: changes.len(),
                    },
                    RemoteRequest::Pull { since, .. } => RemoteReply::Changes {
                        changes: pull_batch
                            .iter()
                            .filter(|c| c.seq > since)
                            .cloned()
                            .collect(),
                        cursor: pull_batch.last().map(|c| c.seq).unwrap_or(since),
                    },
                };
                let mut json = serde_json::to_string(&reply).expect("reply");
                json.push('\n');
                writer.write_all(json.as_bytes()).expect("write");
            }
        });
        addr
    }

    fn change(seq: i64) -> Change {
        Change {
            seq,
            entity: "issue".to_string(),
            entity_id: format!("tk-{seq}"),
            field: "title".to_string(),
            value: Some("t".to_string()),
            ts_ms: 100 + seq as u64,
            node_id: "node-r".to_string(),
        }
    }

    #[test]
    fn hello_push_pull_round_trips() {
        let addr = spawn_fake_remote(vec![change(1), change(2)]);
        let mut client = RemoteClient::connect(&addr, "node-local").expect("connect");
        assert_eq!(client.remote_node(), "fake-remote");

        let accepted = client.push(&[change(10), change(11)]).expect("push");
        assert_eq!(accepted, 2);

        let (changes, cursor) = client.pull(1, 100).expect("pull");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].seq, 2);
        assert_eq!(cursor, 2);
    }

    #[test]
    fn scheme_prefix_is_accepted() {
        let addr = spawn_fake_remote(Vec::new());
        let url = format!("tcp://{addr}");
        let client = RemoteClient::connect(&url, "node-local").expect("connect");
        assert_eq!(client.remote_node(), "fake-remote");
    }

    #[test]
    fn unreachable_remote_is_an_error() {
        // Port 1 is reserved and never listening.
        assert!(RemoteClient::connect("127.0.0.1:1", "node-local").is_err());
    }
}
