//! Tandem CLI - drive record sync from the terminal
//!
//! Edit records offline, then reconcile them with the backend on demand or
//! continuously with `tandem watch`.

mod catalog;
mod cli;
mod commands;
mod config_profiles;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::assets::run_assets;
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::record::run_record;
use crate::commands::sync::run_sync_command;
use crate::commands::version::run_version_check;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tandem=info,tandem_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Record { command } => run_record(command, &db_path).await?,
        Commands::Sync { full, command } => {
            run_sync_command(full, command, &db_path, profile).await?;
        }
        Commands::Watch => run_watch(&db_path, profile).await?,
        Commands::VersionCheck { json } => run_version_check(json, profile).await?,
        Commands::Assets { command } => run_assets(command, &db_path, profile).await?,
        Commands::Config { command } => run_config(command, profile)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
