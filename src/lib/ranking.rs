use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    config::RankingConfig,
    error::{RankError, Result},
};

/// One trader's leaderboard row at the moment it was collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RankEntry {
    pub nickname: String,
    pub volume: f64,
    pub number_of_trades: u64,
    pub created_at: DateTime<Utc>,
}

impl RankEntry {
    /// Volume traded per fill; zero when no trades were recorded.
    pub fn volume_per_trade(&self) -> f64 {
        if self.number_of_trades == 0 {
            0.0
        } else {
            self.volume / self.number_of_trades as f64
        }
    }
}

/// A leaderboard row as the exchange returns it, without a collection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranker {
    #[serde(rename = "Nickname", alias = "nickname", alias = "nickName")]
    pub nickname: String,
    #[serde(rename = "Volume", alias = "volume")]
    pub volume: f64,
    #[serde(
        rename = "NumberOfTrades",
        alias = "numberOfTrades",
        alias = "number_of_trades"
    )]
    pub number_of_trades: u64,
}

impl Ranker {
    pub fn stamp(self, created_at: DateTime<Utc>) -> RankEntry {
        RankEntry {
            nickname: self.nickname,
            volume: self.volume,
            number_of_trades: self.number_of_trades,
            created_at,
        }
    }
}

/// Supplies the current leaderboard sorted by `metric` (e.g. `VOLUME`).
#[async_trait]
pub trait RankingSource: Send + Sync {
    async fn fetch(&self, metric: &str) -> Result<Vec<Ranker>>;
}

pub struct HttpRankingSource {
    config: RankingConfig,
    client: Client,
}

impl HttpRankingSource {
    pub fn new(config: RankingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| RankError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self { config, client })
    }

    fn resolved_endpoint(&self) -> String {
        let endpoint = self.config.endpoint.trim();
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        }
    }
}

#[async_trait]
impl RankingSource for HttpRankingSource {
    async fn fetch(&self, metric: &str) -> Result<Vec<Ranker>> {
        let response = self
            .client
            .get(self.resolved_endpoint())
            .query(&[(self.config.metric_param.as_str(), metric)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RankError::Fetch(format!(
                "ranking endpoint returned {status}"
            )));
        }

        let rankers: Vec<Ranker> = response.json().await?;
        Ok(rankers)
    }
}
