use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Args;

use rankdbx::{
    config::ConfigUpdate, ingest::Ingestor, ranking::HttpRankingSource, store::RocksStore,
};

use crate::{
    commands::{close_store, load_and_update_config},
    logging,
};

#[derive(Args)]
pub struct IngestArgs {
    /// Ranking sort metric to collect (defaults to the configured metric)
    #[arg(long)]
    pub metric: Option<String>,

    /// Override the ranking endpoint URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Override the configured data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Emit the ingestion report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(config_path: Option<PathBuf>, args: IngestArgs) -> Result<()> {
    let config = load_and_update_config(
        config_path,
        ConfigUpdate {
            data_dir: args.data_dir,
            endpoint: args.endpoint,
            ..ConfigUpdate::default()
        },
    )?;
    let _log_guard = logging::init(&config.log_dir()?)?;

    let store_path = config.store_path();
    let store = Arc::new(
        RocksStore::open(store_path.clone())
            .with_context(|| format!("failed to open store at {}", store_path.display()))?,
    );
    let source = Arc::new(HttpRankingSource::new(config.ranking.clone())?);
    let ingestor = Ingestor::new(source, store.clone());

    let metric = args.metric.unwrap_or_else(|| config.ingest.metric.clone());
    let result = ingestor.ingest(&metric).await;
    drop(ingestor);
    close_store(store)?;

    let report = result.with_context(|| format!("failed to ingest {metric} ranking"))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "stored {} of {} {} rankings at {} ({} failed)",
            report.written,
            report.fetched,
            metric,
            report.created_at.to_rfc3339(),
            report.failed
        );
    }
    Ok(())
}
