use clap::Subcommand;

use super::Ctx;
use crate::daemon::ipc::{self, Request, ResponsePayload};
use crate::daemon::registry::{self, DaemonStatus};

#[derive(Subcommand, Debug)]
pub enum RemoteCmd {
    /// Ensure the daemon is running and request a sync now.
    Sync,
    /// Report daemon and connection state.
    Status,
    /// Stop the daemon for this database (no-op when not running).
    Stop,
}

pub fn run(ctx: &Ctx, cmd: &RemoteCmd) -> crate::Result<()> {
    match cmd {
        RemoteCmd::Sync => sync(ctx),
        RemoteCmd::Status => status(ctx),
        RemoteCmd::Stop => stop(ctx),
    }
}

fn sync(ctx: &Ctx) -> crate::Result<()> {
    let Some(url) = ctx.config.remote_url() else {
        // Local-only mode: nothing to sync with, and that is fine.
        if ctx.json {
            println!("{}", serde_json::json!({ "remote": false }));
        } else {
            println!("no remote configured");
        }
        return Ok(());
    };

    let pid = registry::ensure_daemon(&ctx.db_path, Some(url))?;
    let started = match ipc::request_payload(&ctx.db_path, &Request::TriggerSync)? {
        ResponsePayload::Sync { started } => started,
        _ => false,
    };

    if ctx.json {
        println!(
            "{}",
            serde_json::json!({ "remote": true, "pid": pid, "started": started })
        );
    } else if started {
        println!("sync requested, daemon PID: {pid}");
    } else {
        println!("sync already in progress, daemon PID: {pid}");
    }
    Ok(())
}

fn status(ctx: &Ctx) -> crate::Result<()> {
    let has_remote = ctx.config.remote_url().is_some();
    let status = registry::status(&ctx.db_path)?;
    if ctx.json {
        let value = match status {
            DaemonStatus::NotRunning => {
                serde_json::json!({ "remote": has_remote, "running": false })
            }
            DaemonStatus::Running { pid } => serde_json::json!({
                "remote": has_remote, "running": true, "pid": pid, "connected": false
            }),
            DaemonStatus::Connected { pid } => serde_json::json!({
                "remote": has_remote, "running": true, "pid": pid, "connected": true
            }),
        };
        println!("{value}");
        return Ok(());
    }
    // Both facts matter: a daemon may outlive the config that spawned it.
    if !has_remote {
        println!("no remote configured");
    }
    match status {
        DaemonStatus::NotRunning => {
            if has_remote {
                println!("daemon not running");
            }
        }
        DaemonStatus::Running { pid } => println!("daemon running, PID: {pid}, disconnected"),
        DaemonStatus::Connected { pid } => println!("daemon running, PID: {pid}, connected"),
    }
    Ok(())
}

fn stop(ctx: &Ctx) -> crate::Result<()> {
    let stopped = registry::stop(&ctx.db_path)?;
    if ctx.json {
        println!("{}", serde_json::json!({ "stopped": stopped }));
    } else if stopped {
        println!("daemon stopped");
    } else {
        println!("daemon not running");
    }
    Ok(())
}
