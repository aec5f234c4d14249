use std::{
    io::{self, BufReader},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::mpsc;
use tracing::info;

use rankdbx::{
    config::ConfigUpdate,
    console,
    dispatcher::{self, Dispatcher, IngestSchedule},
    ingest::Ingestor,
    query::{QueryOptions, QueryRouter},
    ranking::HttpRankingSource,
    store::RocksStore,
};

use crate::{
    commands::{close_store, load_and_update_config},
    logging,
};

#[derive(Args, Clone)]
pub struct StartArgs {
    /// Read `<name> <date> [<date>]` queries from stdin
    #[arg(short = 'c', long)]
    pub console: bool,

    /// Override the configured data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Override the ingestion interval in seconds
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Override the ranking sort metric
    #[arg(long)]
    pub metric: Option<String>,

    /// Override the ranking endpoint URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Run one ingestion cycle immediately instead of waiting a full interval
    #[arg(long)]
    pub ingest_on_start: bool,

    /// Override the directory holding the daily error logs
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Hours added to console query dates to reach the exchange's timezone
    #[arg(long, allow_hyphen_values = true)]
    pub exchange_offset_hours: Option<i32>,

    /// Reject console queries with unparseable dates
    #[arg(long)]
    pub strict_dates: bool,
}

impl StartArgs {
    fn update(&self) -> ConfigUpdate {
        ConfigUpdate {
            data_dir: self.data_dir.clone(),
            interval_secs: self.interval_secs,
            metric: self.metric.clone(),
            ingest_on_start: self.ingest_on_start.then_some(true),
            endpoint: self.endpoint.clone(),
            log_dir: self.log_dir.clone(),
            exchange_offset_hours: self.exchange_offset_hours,
            strict_dates: self.strict_dates.then_some(true),
        }
    }
}

pub async fn execute(config_path: Option<PathBuf>, args: StartArgs) -> Result<()> {
    let config = load_and_update_config(config_path, args.update())?;
    let log_guard = logging::init(&config.log_dir()?)?;

    let store_path = config.store_path();
    let store = Arc::new(
        RocksStore::open(store_path.clone())
            .with_context(|| format!("failed to open store at {}", store_path.display()))?,
    );
    let source = Arc::new(HttpRankingSource::new(config.ranking.clone())?);
    let router = QueryRouter::new(store.clone(), QueryOptions::from_config(&config.query)?);
    let dispatcher = Dispatcher::new(
        Ingestor::new(source, store.clone()),
        router,
        IngestSchedule::from_config(&config.ingest),
    );

    let (line_tx, line_rx) = mpsc::channel(config.console.queue_capacity);
    if args.console {
        console::print_usage(&mut io::stdout())?;
        console::spawn_line_reader(BufReader::new(io::stdin()), line_tx)
            .context("failed to start console reader")?;
    } else {
        drop(line_tx);
    }

    eprintln!(
        "rankdbx collecting {} rankings every {}s into {} (pid={})",
        config.ingest.metric,
        config.ingest.interval_secs,
        store_path.display(),
        std::process::id()
    );

    let outcome = dispatcher
        .run(line_rx, &mut io::stdout(), dispatcher::shutdown_signal())
        .await;
    drop(dispatcher);

    close_store(store)?;
    info!(log = %log_guard.path().display(), "shutdown complete");
    drop(log_guard);

    match outcome {
        Err(err) if err.is_termination() => Ok(()),
        other => other.context("dispatcher stopped unexpectedly"),
    }
}
