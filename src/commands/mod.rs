use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use tracing::warn;

use rankdbx::{
    config::{Config, ConfigUpdate, load_or_default},
    store::RocksStore,
};

pub mod ingest;
pub mod query;
pub mod start;

/// Loads the configuration file, applies command-line overrides and persists
/// the result so later runs see the same settings.
pub(crate) fn load_and_update_config(
    config_path: Option<PathBuf>,
    update: ConfigUpdate,
) -> Result<Config> {
    let (mut config, path) = load_or_default(config_path).context("failed to load configuration")?;
    config.apply_update(update);
    config.validate()?;
    config.ensure_data_dir()?;
    config
        .save(&path)
        .with_context(|| format!("failed to save configuration to {}", path.display()))?;
    Ok(config)
}

/// Closes the store if this is the last handle. Returns whether it was
/// closed; a store still shared elsewhere is released when its last handle
/// drops.
pub(crate) fn close_store(store: Arc<RocksStore>) -> Result<bool> {
    match Arc::try_unwrap(store) {
        Ok(store) => {
            store.close().context("failed to close store")?;
            Ok(true)
        }
        Err(_) => {
            warn!("store still shared at shutdown; releasing on drop");
            Ok(false)
        }
    }
}
