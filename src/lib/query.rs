//! Console query handling: `<name> <date> [<date>]` lines become bounded
//! scans over one nickname's snapshots.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use tracing::{debug, warn};

use super::{
    config::QueryConfig,
    error::{RankError, Result},
    key::{self, RANKING_TABLE},
    ranking::RankEntry,
    store::KeyValueStore,
};

/// Accepted date spellings, tried in order, each with its separator byte.
pub const DATE_FORMATS: [(&str, Option<u8>); 3] = [
    ("%Y%m%d", None),
    ("%Y/%m/%d", Some(b'/')),
    ("%Y-%m-%d", Some(b'-')),
];
pub const NO_DATA: &str = "no data";
const DISPLAY_FORMAT: &str = "%Y/%m/%d %H:%M";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub exchange_offset: FixedOffset,
    pub strict_dates: bool,
    pub label: String,
}

impl QueryOptions {
    pub fn from_config(config: &QueryConfig) -> Result<Self> {
        let exchange_offset = FixedOffset::east_opt(config.exchange_offset_hours * 3600)
            .ok_or_else(|| {
                RankError::Config(format!(
                    "invalid exchange offset of {} hours",
                    config.exchange_offset_hours
                ))
            })?;
        Ok(Self {
            exchange_offset,
            strict_dates: config.strict_dates,
            label: config.label.clone(),
        })
    }

    fn shift(&self) -> Duration {
        Duration::seconds(i64::from(self.exchange_offset.local_minus_utc()))
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        let config = QueryConfig::default();
        Self::from_config(&config).unwrap_or_else(|_| Self {
            exchange_offset: Utc.fix(),
            strict_dates: config.strict_dates,
            label: config.label.clone(),
        })
    }
}

/// Parses a console line into a name and a window.
///
/// Dates are read as calendar days and moved forward by the exchange offset.
/// A missing end date leaves the window open until `now`. An unparseable date
/// becomes `now`, shifted like any other date, unless `strict_dates` is set,
/// in which case the line is rejected.
pub fn parse_query(
    line: &str,
    options: &QueryOptions,
    now: DateTime<Utc>,
) -> Result<RangeQuery> {
    let mut tokens = line.split_whitespace();
    let name = tokens
        .next()
        .ok_or_else(|| RankError::Parse("empty input".into()))?
        .to_string();

    let dates: Vec<&str> = tokens.collect();
    if dates.is_empty() {
        return Err(RankError::Parse(format!(
            "{name}: at least one date is required"
        )));
    }
    if dates.len() > 2 {
        return Err(RankError::Parse(format!(
            "{name}: expected at most two dates, got {}",
            dates.len()
        )));
    }

    let start = resolve_date(dates[0], options, now)?;
    let end = match dates.get(1) {
        Some(token) => resolve_date(token, options, now)?,
        None => now,
    };

    Ok(RangeQuery { name, start, end })
}

fn resolve_date(
    token: &str,
    options: &QueryOptions,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    match parse_date(token) {
        Some(date) => Ok(date.and_time(NaiveTime::MIN).and_utc() + options.shift()),
        None if options.strict_dates => {
            Err(RankError::Parse(format!("unrecognised date {token:?}")))
        }
        None => {
            debug!(token, "unrecognised date, substituting current time");
            Ok(now + options.shift())
        }
    }
}

/// Parses a zero-padded `YYYYMMDD`, `YYYY/MM/DD` or `YYYY-MM-DD` token.
pub fn parse_date(token: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .filter(|(_, separator)| has_layout(token.as_bytes(), *separator))
        .find_map(|(format, _)| NaiveDate::parse_from_str(token, format).ok())
}

/// Four year digits, then two month and two day digits, optionally split by
/// `separator`. Unpadded fields and signed years do not match.
fn has_layout(token: &[u8], separator: Option<u8>) -> bool {
    let digits = |part: &[u8]| part.iter().all(u8::is_ascii_digit);
    match separator {
        None => token.len() == 8 && digits(token),
        Some(sep) => {
            token.len() == 10
                && token[4] == sep
                && token[7] == sep
                && digits(&token[..4])
                && digits(&token[5..7])
                && digits(&token[8..])
        }
    }
}

#[derive(Clone)]
pub struct QueryRouter {
    store: Arc<dyn KeyValueStore>,
    options: QueryOptions,
}

impl QueryRouter {
    pub fn new(store: Arc<dyn KeyValueStore>, options: QueryOptions) -> Self {
        Self { store, options }
    }

    pub fn parse(&self, line: &str, now: DateTime<Utc>) -> Result<RangeQuery> {
        parse_query(line, &self.options, now)
    }

    /// Snapshots for `name` with `start <= created_at < end`, oldest first.
    ///
    /// Rows that fail to read or decode are skipped, as are rows belonging to
    /// another nickname that happens to share the key prefix.
    pub fn query(
        &self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<RankEntry> {
        if start >= end {
            return Vec::new();
        }

        let range = key::range_bounds(RANKING_TABLE, name, start, end);
        let mut entries = Vec::new();
        for item in self.store.scan(&range) {
            let (key, value) = match item {
                Ok(pair) => pair,
                Err(err) => {
                    warn!("skipping unreadable ranking row for {name}: {err}");
                    continue;
                }
            };
            let entry: RankEntry = match serde_json::from_slice(&value) {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(
                        key = %String::from_utf8_lossy(&key),
                        "skipping undecodable ranking row: {err}"
                    );
                    continue;
                }
            };
            if entry.nickname != name {
                continue;
            }
            entries.push(entry);
        }
        entries
    }

    pub fn run(&self, query: &RangeQuery) -> Vec<RankEntry> {
        self.query(&query.name, query.start, query.end)
    }

    pub fn format_entry(&self, entry: &RankEntry) -> String {
        let shown = entry.created_at.with_timezone(&self.options.exchange_offset);
        format!(
            "{} - {:.1} - {:.2}/1 {}\t{}",
            entry.nickname,
            entry.volume,
            entry.volume_per_trade(),
            self.options.label,
            shown.format(DISPLAY_FORMAT)
        )
    }

    /// Parses, runs and formats one console line. An empty result becomes a
    /// single `no data` line.
    pub fn answer(&self, line: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let query = self.parse(line, now)?;
        let entries = self.run(&query);
        if entries.is_empty() {
            return Ok(vec![NO_DATA.to_string()]);
        }
        Ok(entries
            .iter()
            .map(|entry| self.format_entry(entry))
            .collect())
    }
}
