//! Command-line interface.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{self, WorkspaceConfig};
use crate::store::Store;
use crate::workspace::{self, ResolverError};

use commands::daemon::DaemonCmd;
use commands::dep::DepCmd;
use commands::init::InitArgs;
use commands::label::LabelCmd;
use commands::list::ListArgs;
use commands::new::NewArgs;
use commands::note::NoteCmd;
use commands::remote::RemoteCmd;

#[derive(Parser, Debug)]
#[command(name = "tick", version, about = "Local-first issue tracker")]
pub struct Cli {
    /// Emit JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Run as if invoked from this directory.
    #[arg(long, global = true, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize or update the workspace configuration.
    Init(InitArgs),
    /// Create an issue.
    #[command(alias = "create")]
    New(NewArgs),
    /// Show one issue with notes and blocked state.
    Show { id: String },
    /// List issues, optionally filtered.
    List(ListArgs),
    /// Begin work: todo -> in_progress.
    Start { id: String },
    /// Finish work: in_progress -> done.
    Done { id: String },
    /// Close with a mandatory reason.
    Close {
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Reopen: done/closed require a reason, in_progress does not.
    Reopen {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Manage labels.
    #[command(subcommand)]
    Label(LabelCmd),
    /// Manage notes.
    #[command(subcommand)]
    Note(NoteCmd),
    /// Manage dependencies.
    #[command(subcommand)]
    Dep(DepCmd),
    /// List issues blocked by unsettled dependencies.
    Blocked,
    /// Check database integrity.
    Verify,
    /// Interact with the sync daemon.
    #[command(subcommand)]
    Remote(RemoteCmd),
    /// Daemon internals (normally spawned, not invoked by hand).
    #[command(subcommand)]
    Daemon(DaemonCmd),
}

/// Resolved invocation context shared by the workspace-facing commands.
pub struct Ctx {
    pub working_dir: PathBuf,
    pub config: WorkspaceConfig,
    pub db_path: PathBuf,
    pub json: bool,
}

impl Ctx {
    pub fn new(dir: Option<PathBuf>, json: bool) -> crate::Result<Self> {
        let working_dir = match dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(ResolverError::WorkingDir)?,
        };
        let config = config::load(&working_dir)?;
        let db_path = workspace::resolve(&working_dir, &config)?;
        Ok(Self {
            working_dir,
            config,
            db_path,
            json,
        })
    }

    pub fn open_store(&self) -> crate::Result<Store> {
        Ok(Store::open(&self.db_path)?)
    }

    /// `user@host`, recorded as assignee on `start`.
    pub fn actor() -> String {
        let host = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());
        format!("{}@{host}", whoami::username())
    }
}

pub fn run(cli: Cli) -> crate::Result<()> {
    let Cli {
        json,
        dir,
        command,
        ..
    } = cli;

    let command = match command {
        // The daemon resolves nothing from the invoking directory; it is
        // handed an explicit database path by its spawner.
        Commands::Daemon(cmd) => return commands::daemon::run(cmd),
        Commands::Init(args) => {
            let working_dir = match dir {
                Some(dir) => dir,
                None => std::env::current_dir().map_err(ResolverError::WorkingDir)?,
            };
            return commands::init::run(&working_dir, &args, json);
        }
        other => other,
    };

    let ctx = Ctx::new(dir, json)?;
    match command {
        Commands::Init(_) | Commands::Daemon(_) => unreachable!("handled above"),
        Commands::New(args) => commands::new::run(&ctx, &args),
        Commands::Show { id } => commands::show::run(&ctx, &id),
        Commands::List(args) => commands::list::run(&ctx, &args),
        Commands::Start { id } => commands::workflow::start(&ctx, &id),
        Commands::Done { id } => commands::workflow::done(&ctx, &id),
        Commands::Close { id, reason } => commands::workflow::close(&ctx, &id, &reason),
        Commands::Reopen { id, reason } => {
            commands::workflow::reopen(&ctx, &id, reason.as_deref())
        }
        Commands::Label(cmd) => commands::label::run(&ctx, &cmd),
        Commands::Note(cmd) => commands::note::run(&ctx, &cmd),
        Commands::Dep(cmd) => commands::dep::run(&ctx, &cmd),
        Commands::Blocked => commands::dep::blocked(&ctx),
        Commands::Verify => commands::verify::run(&ctx),
        Commands::Remote(cmd) => commands::remote::run(&ctx, &cmd),
    }
}
