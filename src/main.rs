mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{ingest::IngestArgs, query::QueryArgs, start::StartArgs};

#[derive(Parser)]
#[command(author, version, about = "Ranking snapshot collector and query console")]
struct Cli {
    /// Path to the configuration file. Defaults to ./.rankdbx/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect rankings on a schedule and answer console queries
    Start(StartArgs),
    /// Run a single ingestion cycle
    Ingest(IngestArgs),
    /// Look up stored snapshots for one trader
    Query(QueryArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { config, command } = Cli::parse();

    match command {
        Commands::Start(args) => commands::start::execute(config, args).await?,
        Commands::Ingest(args) => commands::ingest::execute(config, args).await?,
        Commands::Query(args) => commands::query::execute(config, args)?,
    }

    Ok(())
}
