use std::path::{Path, PathBuf};

use clap::Args;

use crate::config::{self, RemoteConfig};
use crate::store::Store;
use crate::workspace;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Issue id prefix (alphanumeric, default "tk").
    #[arg(long)]
    pub prefix: Option<String>,

    /// Shared workspace directory; directories configured with the same
    /// value share one database and one daemon.
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Sync remote, `host:port`.
    #[arg(long, value_name = "URL")]
    pub remote: Option<String>,
}

/// Write (or update) `.tick/config.toml` and create the database.
/// Idempotent: re-running with no flags changes nothing.
pub fn run(working_dir: &Path, args: &InitArgs, json: bool) -> crate::Result<()> {
    let mut config = config::load(working_dir)?;
    if let Some(dir) = &args.workspace {
        config.workspace = Some(dir.clone());
    }
    if let Some(url) = &args.remote {
        config.remote = Some(RemoteConfig { url: url.clone() });
    }
    config::write_config(&config::config_path(working_dir), &config)?;

    let db_path = workspace::resolve(working_dir, &config)?;
    let mut store = Store::open(&db_path)?;
    if let Some(prefix) = &args.prefix {
        store.set_prefix(prefix)?;
    }

    if json {
        println!(
            "{}",
            serde_json::json!({
                "db_path": db_path,
                "prefix": store.prefix(),
                "remote": config.remote_url(),
            })
        );
    } else {
        println!("initialized workspace, database at {}", db_path.display());
    }
    Ok(())
}
