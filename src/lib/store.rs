use std::{path::PathBuf, time::Instant};

use metrics::{counter, histogram};
use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, ReadOptions};

use super::{
    error::{RankError, Result},
    key::KeyRange,
};

pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Lazy ascending iterator over a key range.
pub type ScanIter<'a> = Box<dyn Iterator<Item = Result<KeyValue>> + 'a>;

/// Ordered key-value substrate used by ingestion and queries.
///
/// Implementations must make a single `put` atomic: a concurrent `scan` sees
/// either the whole value or none of it.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Iterates `[range.low, range.high)` in ascending key order. An empty or
    /// inverted range yields nothing.
    fn scan(&self, range: &KeyRange) -> ScanIter<'_>;
}

pub struct RocksStore {
    db: DBWithThreadMode<MultiThreaded>,
    path: PathBuf,
    read_only: bool,
}

impl RocksStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DBWithThreadMode::<MultiThreaded>::open(&options, &path)
            .map_err(|err| RankError::Storage(err.to_string()))?;

        Ok(Self {
            db,
            path,
            read_only: false,
        })
    }

    pub fn open_read_only(path: PathBuf) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(false);
        let db = DBWithThreadMode::<MultiThreaded>::open_for_read_only(&options, &path, false)
            .map_err(|err| RankError::Storage(err.to_string()))?;

        Ok(Self {
            db,
            path,
            read_only: true,
        })
    }

    /// Flushes memtables and releases the database handle.
    pub fn close(self) -> Result<()> {
        let start = Instant::now();
        let result = if self.read_only {
            Ok(())
        } else {
            self.db
                .flush()
                .map_err(|err| RankError::Storage(err.to_string()))
        };
        record_store_op("rocksdb_flush", status(&result), start);
        drop(self.db);
        result
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(RankError::Storage(format!(
                "store at {} is opened read-only",
                self.path.display()
            )))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for RocksStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let start = Instant::now();
        let result = self
            .db
            .put(key, value)
            .map_err(|err| RankError::Storage(err.to_string()));
        record_store_op("rocksdb_put", status(&result), start);
        result
    }

    fn scan(&self, range: &KeyRange) -> ScanIter<'_> {
        if range.is_empty() {
            return Box::new(std::iter::empty());
        }

        let mut read_options = ReadOptions::default();
        read_options.set_iterate_upper_bound(range.high.clone());
        let iter = self.db.iterator_opt(
            IteratorMode::From(range.low.as_slice(), Direction::Forward),
            read_options,
        );
        counter!("rankdbx_store_scans_total").increment(1);

        Box::new(iter.map(|item| {
            item.map(|(key, value)| (key.into_vec(), value.into_vec()))
                .map_err(|err| RankError::Storage(err.to_string()))
        }))
    }
}

fn status<T>(result: &Result<T>) -> &'static str {
    if result.is_ok() { "ok" } else { "err" }
}

fn record_store_op(operation: &'static str, status: &'static str, start: Instant) {
    let labels = [("operation", operation), ("status", status)];
    counter!("rankdbx_store_operations_total", &labels).increment(1);
    histogram!("rankdbx_store_operation_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}
