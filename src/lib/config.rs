use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{RankError, Result};

pub const LOG_DIR_ENV: &str = "RANKDBX_LOG_DIR";
pub const DEFAULT_INTERVAL_SECS: u64 = 15 * 60;
pub const DEFAULT_METRIC: &str = "VOLUME";
pub const DEFAULT_EXCHANGE_OFFSET_HOURS: i32 = 9;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_ENDPOINT: &str = "https://lightning.bitflyer.com/api/trade/ranking";
const DEFAULT_LABEL: &str = "avg per fill";
const STORE_DIR_NAME: &str = "ldb";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub interval_secs: u64,
    pub metric: String,
    /// Run one cycle as soon as the loop starts instead of waiting a full interval.
    pub on_start: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            metric: DEFAULT_METRIC.to_string(),
            on_start: false,
        }
    }
}

impl IngestConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub endpoint: String,
    /// Query-string parameter carrying the sort metric.
    pub metric_param: String,
    pub timeout_secs: u64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            metric_param: "type".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Hours added to every parsed calendar date to land on the exchange's
    /// fixed timezone. Results are displayed in the same offset.
    pub exchange_offset_hours: i32,
    /// Reject lines with unparseable dates instead of substituting "now".
    pub strict_dates: bool,
    pub label: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            exchange_offset_hours: DEFAULT_EXCHANGE_OFFSET_HOURS,
            strict_dates: false,
            label: DEFAULT_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub queue_capacity: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            data_dir: default_data_dir(),
            log_dir: None,
            created_at: now,
            updated_at: now,
            ingest: IngestConfig::default(),
            ranking: RankingConfig::default(),
            query: QueryConfig::default(),
            console: ConsoleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub data_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub interval_secs: Option<u64>,
    pub metric: Option<String>,
    pub ingest_on_start: Option<bool>,
    pub endpoint: Option<String>,
    pub exchange_offset_hours: Option<i32>,
    pub strict_dates: Option<bool>,
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = env::current_dir().map_err(|err| RankError::Config(err.to_string()))?;
    path.push(".rankdbx");
    path.push("config.toml");
    Ok(path)
}

pub fn load_or_default(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let config_path = if let Some(path) = path {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        path
    } else {
        default_config_path()?
    };

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let cfg: Config = toml::from_str(&contents)?;
        cfg.validate()?;
        cfg.ensure_data_dir()?;
        Ok((cfg, config_path))
    } else {
        let cfg = Config::default();
        cfg.ensure_data_dir()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        cfg.save(&config_path)?;
        Ok((cfg, config_path))
    }
}

impl Config {
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_update(&mut self, update: ConfigUpdate) {
        if let Some(dir) = update.data_dir {
            self.data_dir = dir;
        }
        if let Some(dir) = update.log_dir {
            self.log_dir = Some(dir);
        }
        if let Some(secs) = update.interval_secs {
            self.ingest.interval_secs = secs;
        }
        if let Some(metric) = update.metric {
            self.ingest.metric = metric;
        }
        if let Some(on_start) = update.ingest_on_start {
            self.ingest.on_start = on_start;
        }
        if let Some(endpoint) = update.endpoint {
            self.ranking.endpoint = endpoint;
        }
        if let Some(hours) = update.exchange_offset_hours {
            self.query.exchange_offset_hours = hours;
        }
        if let Some(strict) = update.strict_dates {
            self.query.strict_dates = strict;
        }
        self.updated_at = Utc::now();
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.interval_secs == 0 {
            return Err(RankError::Config(
                "ingest.interval_secs must be greater than zero".into(),
            ));
        }
        if self.ingest.metric.trim().is_empty() {
            return Err(RankError::Config("ingest.metric cannot be empty".into()));
        }
        if self.ranking.endpoint.trim().is_empty() {
            return Err(RankError::Config("ranking.endpoint cannot be empty".into()));
        }
        if !(-23..=23).contains(&self.query.exchange_offset_hours) {
            return Err(RankError::Config(format!(
                "query.exchange_offset_hours must be within -23..=23 (got {})",
                self.query.exchange_offset_hours
            )));
        }
        if self.console.queue_capacity == 0 {
            return Err(RankError::Config(
                "console.queue_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn ensure_data_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_DIR_NAME)
    }

    /// Log directory: `RANKDBX_LOG_DIR` wins, then the configured value, then
    /// `<data_dir>/logs`. Relative paths resolve against the working directory.
    pub fn log_dir(&self) -> Result<PathBuf> {
        let dir = match env::var(LOG_DIR_ENV) {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
            _ => self
                .log_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("logs")),
        };
        if dir.is_absolute() {
            return Ok(dir);
        }
        let base = env::current_dir().map_err(|err| RankError::Config(err.to_string()))?;
        Ok(base.join(dir))
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(current_dir) = env::current_dir() {
        return current_dir.join(".rankdbx");
    }
    dirs::home_dir()
        .map(|home| home.join(".rankdbx"))
        .unwrap_or_else(|| PathBuf::from(".rankdbx"))
}
