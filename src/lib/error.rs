use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RankError>;

#[derive(Debug, Error)]
pub enum RankError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("ranking fetch failed: {0}")]
    Fetch(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid query: {0}")]
    Parse(String),
    #[error("received signal {0}")]
    Terminated(String),
}

impl RankError {
    /// True for the error the dispatcher returns when asked to stop.
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

impl From<toml::de::Error> for RankError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for RankError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for RankError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for RankError {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(err.to_string())
    }
}
