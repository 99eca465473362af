#![forbid(unsafe_code)]

use clap::Parser;

use tick::cli::{self, Cli, Commands};

fn main() {
    let cli = Cli::parse();

    // The daemon logs to its per-database file instead of stderr.
    if !matches!(cli.command, Commands::Daemon(_)) {
        init_tracing(cli.verbose);
    }

    if let Err(err) = cli::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
