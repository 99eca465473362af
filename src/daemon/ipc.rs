//! Control-channel protocol and client.
//!
//! Newline-delimited JSON over a Unix socket in the registry directory.
//!
//! Request format: `{"op": "status"}\n`
//! Response format: `{"ok": {...}}\n` or `{"err": {"code": "...", "message": "..."}}\n`

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::DaemonState;
use crate::paths;

const CLIENT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Start a sync unless one is already in flight (idempotent).
    TriggerSync,
    /// Current state and pid. Answered promptly even mid-sync.
    Status,
    /// Graceful shutdown; an in-flight sync is aborted only at the next
    /// transaction boundary.
    Stop,
    /// Health check.
    Ping,
}

/// Control response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ok { ok: ResponsePayload },
    Err { err: ErrorPayload },
}

impl Response {
    pub fn ok(payload: ResponsePayload) -> Self {
        Response::Ok { ok: payload }
    }

    pub fn err(code: &str, message: impl Into<String>) -> Self {
        Response::Err {
            err: ErrorPayload {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponsePayload {
    Status {
        state: DaemonState,
        pid: u32,
        db_path: PathBuf,
    },
    Sync {
        /// False when a sync was already in flight.
        started: bool,
    },
    Stopping,
    Pong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IpcError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("daemon closed the connection")]
    Disconnected,

    #[error("daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("daemon error [{code}]: {message}")]
    Daemon { code: String, message: String },
}

pub fn encode_response(resp: &Response) -> Result<Vec<u8>, IpcError> {
    let mut bytes = serde_json::to_vec(resp)?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode_request(line: &str) -> Result<Request, IpcError> {
    Ok(serde_json::from_str(line)?)
}

/// One request/response round trip against the daemon for `db_path`.
pub fn send_request(db_path: &Path, req: &Request) -> Result<Response, IpcError> {
    let socket = paths::socket_path(db_path);
    let stream = UnixStream::connect(&socket)
        .map_err(|e| IpcError::DaemonUnavailable(format!("{}: {e}", socket.display())))?;
    stream.set_read_timeout(Some(CLIENT_IO_TIMEOUT))?;
    stream.set_write_timeout(Some(CLIENT_IO_TIMEOUT))?;
    round_trip(stream, req)
}

/// Like `send_request`, but converts a daemon-reported error payload into
/// an `IpcError::Daemon`.
pub fn request_payload(db_path: &Path, req: &Request) -> Result<ResponsePayload, IpcError> {
    match send_request(db_path, req)? {
        Response::Ok { ok } => Ok(ok),
        Response::Err { err } => Err(IpcError::Daemon {
            code: err.code,
            message: err.message,
        }),
    }
}

fn round_trip(mut stream: UnixStream, req: &Request) -> Result<Response, IpcError> {
    let mut json = serde_json::to_string(req)?;
    json.push('\n');
    stream.write_all(json.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Err(IpcError::Disconnected);
    }
    Ok(serde_json::from_str(&line)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        for req in [Request::TriggerSync, Request::Status, Request::Stop, Request::Ping] {
            let json = serde_json::to_string(&req).unwrap();
            let parsed: Request = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, req);
        }
    }

    #[test]
    fn status_payload_roundtrip() {
        let resp = Response::ok(ResponsePayload::Status {
            state: DaemonState::Connected,
            pid: 4242,
            db_path: PathBuf::from("/srv/shared/issues.db"),
        });
        let json = String::from_utf8(encode_response(&resp).unwrap()).unwrap();
        assert!(json.contains("\"ok\""));
        assert!(json.contains("\"connected\""));

        let parsed: Response = serde_json::from_str(&json).unwrap();
        match parsed {
            Response::Ok {
                ok: ResponsePayload::Status { state, pid, .. },
            } => {
                assert_eq!(state, DaemonState::Connected);
                assert_eq!(pid, 4242);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let resp = Response::err("sync_failed", "remote hung up");
        let json = String::from_utf8(encode_response(&resp).unwrap()).unwrap();
        assert!(json.contains("\"err\""));
        assert!(json.contains("sync_failed"));
    }
}
