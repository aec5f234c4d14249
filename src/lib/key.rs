//! Composite keys for the ranking key space.
//!
//! Every snapshot row lives under `<table>:<nickname>:<nanos>`, where `nanos`
//! is the Unix timestamp in nanoseconds rendered as a fixed-width decimal.
//! The fixed width is what keeps byte order equal to time order for a given
//! nickname, so a bounded iterator over one nickname's prefix walks its
//! snapshots chronologically.

use chrono::{DateTime, Utc};

pub const RANKING_TABLE: &str = "rankers";

const SEP: u8 = b':';
/// Digits in `i64::MAX`; every non-negative nanosecond timestamp fits.
pub const TIMESTAMP_WIDTH: usize = 19;

/// Half-open key interval `[low, high)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub low: Vec<u8>,
    pub high: Vec<u8>,
}

impl KeyRange {
    pub fn is_empty(&self) -> bool {
        self.low >= self.high
    }
}

pub fn encode(table: &str, name: &str, timestamp_nanos: u64) -> Vec<u8> {
    let mut key = prefix(table, name);
    let digits = format!("{:0width$}", timestamp_nanos, width = TIMESTAMP_WIDTH);
    key.extend_from_slice(digits.as_bytes());
    key
}

pub fn encode_at(table: &str, name: &str, at: DateTime<Utc>) -> Vec<u8> {
    encode(table, name, timestamp_nanos(at))
}

/// Scan bounds selecting `start <= created_at < end` for one name.
pub fn range_bounds(
    table: &str,
    name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> KeyRange {
    KeyRange {
        low: encode_at(table, name, start),
        high: encode_at(table, name, end),
    }
}

/// Nanoseconds since the epoch, clamped to the representable key range.
/// Instants before 1970 map to zero and instants past 2262 to `i64::MAX`.
pub fn timestamp_nanos(at: DateTime<Utc>) -> u64 {
    match at.timestamp_nanos_opt() {
        Some(nanos) if nanos < 0 => 0,
        Some(nanos) => nanos as u64,
        None if at.timestamp() < 0 => 0,
        None => i64::MAX as u64,
    }
}

fn prefix(table: &str, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + name.len() + TIMESTAMP_WIDTH + 2);
    key.extend_from_slice(table.as_bytes());
    key.push(SEP);
    key.extend_from_slice(name.as_bytes());
    key.push(SEP);
    key
}
