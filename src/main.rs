//! `cccc` — local-first collaboration daemon and CLI for coordinating
//! autonomous coding agents in working groups over an append-only
//! ledger.

use anyhow::Result;
use clap::Parser;

mod cli;
mod ipc_client;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Daemon { action } => cli::daemon::dispatch(action).await,
        other => cli::client::dispatch(other).await,
    }
}

/// Installs the process-wide subscriber before anything else touches
/// `cccc_core` (the core crate only depends on `tracing`, not
/// `tracing-subscriber` — this binary owns the filter/format policy).
/// `CCCC_LOG` overrides the default filter; `--verbose` lowers it one
/// notch without requiring the env var.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "cccc=debug,cccc_core=debug" } else { "cccc=info,cccc_core=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("CCCC_LOG").unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
