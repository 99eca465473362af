use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum DaemonCmd {
    /// Run the daemon in the foreground for one database path.
    Run {
        /// Canonical database path to serve.
        #[arg(long)]
        db: PathBuf,
        /// Sync remote, `host:port`. Without it the daemon only answers
        /// status requests.
        #[arg(long)]
        remote: Option<String>,
    },
}

pub fn run(cmd: DaemonCmd) -> crate::Result<()> {
    match cmd {
        DaemonCmd::Run { db, remote } => crate::daemon::run_daemon(&db, remote),
    }
}
