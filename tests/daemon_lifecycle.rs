//! Daemon lifecycle: single-daemon invariant, attach from multiple working
//! directories, idempotent stop, local-only mode.
//!
//! The configured remote is a reserved port that never answers, so the
//! daemon runs disconnected; connection handling itself is covered by the
//! sync engine's unit tests.

use std::os::unix::net::UnixStream;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin;
use predicates::prelude::*;
use tempfile::TempDir;

const DEAD_REMOTE: &str = "127.0.0.1:1";

struct Fixture {
    _data: TempDir,
    _shared: TempDir,
    dir_a: TempDir,
    dir_b: TempDir,
    data_path: std::path::PathBuf,
}

impl Fixture {
    /// Two working directories configured onto one shared workspace with an
    /// unreachable remote.
    fn new() -> Self {
        let data = TempDir::new().expect("data dir");
        let shared = TempDir::new().expect("shared workspace");
        let dir_a = TempDir::new().expect("dir a");
        let dir_b = TempDir::new().expect("dir b");
        let data_path = data.path().to_path_buf();

        let fx = Self {
            _data: data,
            _shared: shared,
            dir_a,
            dir_b,
            data_path,
        };
        for dir in [fx.dir_a.path(), fx.dir_b.path()] {
            fx.tick_in(dir)
                .args([
                    "init",
                    "--workspace",
                    fx._shared.path().to_str().expect("utf8 path"),
                    "--remote",
                    DEAD_REMOTE,
                ])
                .assert()
                .success();
        }
        fx
    }

    fn tick_in(&self, dir: &std::path::Path) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("tick").expect("binary");
        cmd.env("TICK_DATA_DIR", &self.data_path).current_dir(dir);
        cmd
    }

    fn json_in(&self, dir: &std::path::Path, args: &[&str]) -> serde_json::Value {
        let out = self
            .tick_in(dir)
            .arg("--json")
            .args(args)
            .output()
            .expect("run");
        assert!(out.status.success(), "command failed: {args:?}");
        serde_json::from_slice(&out.stdout).expect("json output")
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = assert_cmd::Command::cargo_bin("tick")
            .expect("binary")
            .env("TICK_DATA_DIR", &self.data_path)
            .current_dir(self.dir_a.path())
            .args(["remote", "stop"])
            .output();
    }
}

#[test]
fn two_working_directories_share_one_daemon() {
    let fx = Fixture::new();

    let sync = fx.json_in(fx.dir_a.path(), &["remote", "sync"]);
    let pid = sync["pid"].as_u64().expect("pid");

    // The other directory resolves to the same workspace, so it attaches
    // to the already-running daemon instead of starting its own.
    let status = fx.json_in(fx.dir_b.path(), &["remote", "status"]);
    assert_eq!(status["running"], true);
    assert_eq!(status["pid"].as_u64(), Some(pid));
    assert_eq!(status["connected"], false, "remote never answers");

    let sync_b = fx.json_in(fx.dir_b.path(), &["remote", "sync"]);
    assert_eq!(sync_b["pid"].as_u64(), Some(pid));

    // Stop works from either directory and is idempotent.
    let stop = fx.json_in(fx.dir_b.path(), &["remote", "stop"]);
    assert_eq!(stop["stopped"], true);
    let status = fx.json_in(fx.dir_a.path(), &["remote", "status"]);
    assert_eq!(status["running"], false);
    let stop_again = fx.json_in(fx.dir_a.path(), &["remote", "stop"]);
    assert_eq!(stop_again["stopped"], false);
}

#[test]
fn concurrent_sync_requests_elect_exactly_one_daemon() {
    let fx = Fixture::new();

    let children: Vec<_> = (0..10)
        .map(|n| {
            let dir = if n % 2 == 0 {
                fx.dir_a.path()
            } else {
                fx.dir_b.path()
            };
            Command::new(cargo_bin("tick"))
                .env("TICK_DATA_DIR", &fx.data_path)
                .current_dir(dir)
                .args(["--json", "remote", "sync"])
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .expect("spawn")
        })
        .collect();

    let mut pids = Vec::new();
    for child in children {
        let out = child.wait_with_output().expect("wait");
        assert!(out.status.success());
        let value: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
        pids.push(value["pid"].as_u64().expect("pid"));
    }

    pids.sort();
    pids.dedup();
    assert_eq!(pids.len(), 1, "every client must land on the same daemon");
}

/// The single registry entry under the test-scoped data dir.
fn find_socket(data: &std::path::Path) -> std::path::PathBuf {
    let daemons = data.join("daemons");
    let entry = std::fs::read_dir(&daemons)
        .expect("registry dir")
        .next()
        .expect("one registry entry")
        .expect("entry");
    entry.path().join("daemon.sock")
}

#[test]
fn status_answers_while_another_client_stalls() {
    let fx = Fixture::new();
    fx.json_in(fx.dir_a.path(), &["remote", "sync"]);

    // A connected client that never sends its request.
    let _stalled = UnixStream::connect(find_socket(&fx.data_path)).expect("connect");

    let asked = Instant::now();
    let status = fx.json_in(fx.dir_b.path(), &["remote", "status"]);
    assert_eq!(status["running"], true);
    assert!(
        asked.elapsed() < Duration::from_secs(5),
        "status must not queue behind a stalled connection"
    );
}

#[test]
fn status_reports_missing_remote_even_with_a_daemon_running() {
    let fx = Fixture::new();
    let sync = fx.json_in(fx.dir_a.path(), &["remote", "sync"]);
    let pid = sync["pid"].as_u64().expect("pid");

    // Drop the remote from the config while the daemon keeps running.
    std::fs::write(
        fx.dir_a.path().join(".tick").join("config.toml"),
        format!("workspace = \"{}\"\n", fx._shared.path().display()),
    )
    .expect("rewrite config");

    fx.tick_in(fx.dir_a.path())
        .args(["remote", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no remote configured"))
        .stdout(predicate::str::contains("daemon running"));

    let status = fx.json_in(fx.dir_a.path(), &["remote", "status"]);
    assert_eq!(status["remote"], false);
    assert_eq!(status["running"], true);
    assert_eq!(status["pid"].as_u64(), Some(pid));
}

#[test]
fn daemon_restarts_after_stop() {
    let fx = Fixture::new();

    let first = fx.json_in(fx.dir_a.path(), &["remote", "sync"]);
    let first_pid = first["pid"].as_u64().expect("pid");
    fx.json_in(fx.dir_a.path(), &["remote", "stop"]);

    let second = fx.json_in(fx.dir_a.path(), &["remote", "sync"]);
    let second_pid = second["pid"].as_u64().expect("pid");
    assert_ne!(first_pid, second_pid, "a fresh daemon owns the path now");
}

#[test]
fn local_only_mode_never_spawns_a_daemon() {
    let data = TempDir::new().expect("data dir");
    let dir = TempDir::new().expect("working dir");

    let tick = || {
        let mut cmd = assert_cmd::Command::cargo_bin("tick").expect("binary");
        cmd.env("TICK_DATA_DIR", data.path()).current_dir(dir.path());
        cmd
    };

    // Mutations work and nothing starts in the background.
    tick().args(["new", "offline work"]).assert().success();

    tick()
        .args(["remote", "sync"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no remote configured"));
    tick()
        .args(["remote", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no remote configured"));

    let out = tick()
        .args(["--json", "remote", "status"])
        .output()
        .expect("status");
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
    assert_eq!(value["running"], false);
}
