use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use super::{
    error::{RankError, Result},
    key::{self, RANKING_TABLE},
    ranking::{RankEntry, Ranker, RankingSource},
    store::KeyValueStore,
};

/// Outcome of one ingestion cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub created_at: DateTime<Utc>,
    pub fetched: usize,
    pub written: usize,
    pub failed: usize,
}

pub struct Ingestor {
    source: Arc<dyn RankingSource>,
    store: Arc<dyn KeyValueStore>,
}

impl Ingestor {
    pub fn new(source: Arc<dyn RankingSource>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { source, store }
    }

    /// Fetches the leaderboard for `metric` and stores one row per trader,
    /// all stamped with the same collection time.
    ///
    /// A fetch failure aborts the cycle before anything is written. Rows that
    /// fail to serialize or write are logged and counted in the report.
    pub async fn ingest(&self, metric: &str) -> Result<IngestReport> {
        let rankers = self.source.fetch(metric).await?;
        let now = Utc::now();

        let store = Arc::clone(&self.store);
        let report = tokio::task::spawn_blocking(move || write_snapshot(&*store, rankers, now))
            .await
            .map_err(|err| RankError::Storage(format!("ingestion task failed: {err}")))?;

        info!(
            metric,
            fetched = report.fetched,
            written = report.written,
            failed = report.failed,
            "ranking snapshot stored"
        );
        Ok(report)
    }
}

/// Writes `rankers` as one snapshot taken at `now`.
pub fn write_snapshot(
    store: &dyn KeyValueStore,
    rankers: Vec<Ranker>,
    now: DateTime<Utc>,
) -> IngestReport {
    let nanos = key::timestamp_nanos(now);
    let mut report = IngestReport {
        created_at: now,
        fetched: rankers.len(),
        written: 0,
        failed: 0,
    };

    for ranker in rankers {
        let entry = ranker.stamp(now);
        match store_entry(store, &entry, nanos) {
            Ok(()) => report.written += 1,
            Err(err) => {
                error!(nickname = %entry.nickname, "failed to store ranking entry: {err}");
                report.failed += 1;
            }
        }
    }

    report
}

fn store_entry(store: &dyn KeyValueStore, entry: &RankEntry, nanos: u64) -> Result<()> {
    let value = serde_json::to_vec(entry)?;
    let key = key::encode(RANKING_TABLE, &entry.nickname, nanos);
    store.put(&key, &value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        key::KeyRange,
        store::{KeyValue, RocksStore, ScanIter},
    };
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct FixedSource(Vec<Ranker>);

    #[async_trait]
    impl RankingSource for FixedSource {
        async fn fetch(&self, _metric: &str) -> Result<Vec<Ranker>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl RankingSource for FailingSource {
        async fn fetch(&self, metric: &str) -> Result<Vec<Ranker>> {
            Err(RankError::Fetch(format!("{metric} unavailable")))
        }
    }

    /// Wraps a real store and rejects writes for chosen nicknames.
    struct FlakyStore {
        inner: RocksStore,
        reject: HashSet<String>,
    }

    impl KeyValueStore for FlakyStore {
        fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
            let text = String::from_utf8_lossy(key);
            if self.reject.iter().any(|name| text.contains(&format!(":{name}:"))) {
                return Err(RankError::Storage("simulated write failure".into()));
            }
            self.inner.put(key, value)
        }

        fn scan(&self, range: &KeyRange) -> ScanIter<'_> {
            self.inner.scan(range)
        }
    }

    fn rankers(names: &[&str]) -> Vec<Ranker> {
        names
            .iter()
            .enumerate()
            .map(|(idx, name)| Ranker {
                nickname: name.to_string(),
                volume: 100.0 * (idx + 1) as f64,
                number_of_trades: (idx + 1) as u64,
            })
            .collect()
    }

    fn all_rows(store: &dyn KeyValueStore) -> Vec<KeyValue> {
        let range = KeyRange {
            low: b"rankers:".to_vec(),
            high: b"rankers;".to_vec(),
        };
        store.scan(&range).collect::<Result<Vec<_>>>().unwrap()
    }

    #[tokio::test]
    async fn writes_one_row_per_ranker_with_shared_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> =
            Arc::new(RocksStore::open(dir.path().join("ldb")).unwrap());
        let source = Arc::new(FixedSource(rankers(&["alice", "bob", "carol"])));
        let ingestor = Ingestor::new(source, Arc::clone(&store));

        let report = ingestor.ingest("VOLUME").await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.written, 3);
        assert_eq!(report.failed, 0);

        let rows = all_rows(store.as_ref());
        assert_eq!(rows.len(), 3);
        let nanos = format!(":{:019}", key::timestamp_nanos(report.created_at));
        for (key, value) in rows {
            assert!(String::from_utf8(key).unwrap().ends_with(&nanos));
            let entry: RankEntry = serde_json::from_slice(&value).unwrap();
            assert_eq!(entry.created_at, report.created_at);
        }
    }

    #[tokio::test]
    async fn fetch_failure_aborts_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> =
            Arc::new(RocksStore::open(dir.path().join("ldb")).unwrap());
        let ingestor = Ingestor::new(Arc::new(FailingSource), Arc::clone(&store));

        let err = ingestor.ingest("VOLUME").await.unwrap_err();
        assert!(matches!(err, RankError::Fetch(_)));
        assert!(all_rows(store.as_ref()).is_empty());
    }

    #[test]
    fn each_write_failure_costs_exactly_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlakyStore {
            inner: RocksStore::open(dir.path().join("ldb")).unwrap(),
            reject: ["bob".to_string(), "dave".to_string()].into_iter().collect(),
        };

        let batch = rankers(&["alice", "bob", "carol", "dave", "erin"]);
        let report = write_snapshot(&store, batch, Utc::now());
        assert_eq!(report.fetched, 5);
        assert_eq!(report.written, 3);
        assert_eq!(report.failed, 2);

        let stored: Vec<String> = all_rows(&store)
            .into_iter()
            .map(|(_, value)| serde_json::from_slice::<RankEntry>(&value).unwrap().nickname)
            .collect();
        assert_eq!(stored, vec!["alice", "carol", "erin"]);
    }

    #[test]
    fn later_snapshots_sort_after_earlier_ones() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("ldb")).unwrap();
        let first = Utc::now();
        let second = first + chrono::Duration::minutes(15);

        write_snapshot(&store, rankers(&["alice"]), second);
        write_snapshot(&store, rankers(&["alice"]), first);

        let stamps: Vec<DateTime<Utc>> = all_rows(&store)
            .into_iter()
            .map(|(_, value)| serde_json::from_slice::<RankEntry>(&value).unwrap().created_at)
            .collect();
        assert_eq!(stamps, vec![first, second]);
    }
}
