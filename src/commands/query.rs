use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use rankdbx::{
    config::load_or_default,
    query::{NO_DATA, QueryOptions, QueryRouter},
    store::RocksStore,
};

use crate::logging;

#[derive(Args)]
pub struct QueryArgs {
    /// Trader nickname
    pub name: String,

    /// Start date and optional end date (YYYYMMDD, YYYY/MM/DD or YYYY-MM-DD)
    #[arg(required = true, num_args = 1..=2, value_name = "DATE")]
    pub dates: Vec<String>,

    /// Reject unparseable dates instead of substituting the current time
    #[arg(long)]
    pub strict: bool,

    /// Emit matching entries as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(config_path: Option<PathBuf>, args: QueryArgs) -> Result<()> {
    let (config, _) = load_or_default(config_path).context("failed to load configuration")?;
    let _log_guard = logging::init(&config.log_dir()?)?;

    let store_path = config.store_path();
    if !store_path.exists() {
        println!("{NO_DATA}");
        return Ok(());
    }
    let store = Arc::new(
        RocksStore::open_read_only(store_path.clone())
            .with_context(|| format!("failed to open store at {}", store_path.display()))?,
    );

    let mut options = QueryOptions::from_config(&config.query)?;
    options.strict_dates |= args.strict;
    let router = QueryRouter::new(store, options);
    let line = format!("{} {}", args.name, args.dates.join(" "));

    if args.json {
        let query = router.parse(&line, Utc::now())?;
        let entries = router.run(&query);
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for text in router.answer(&line, Utc::now())? {
            println!("{text}");
        }
    }
    Ok(())
}
