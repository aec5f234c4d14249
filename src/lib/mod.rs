//! Periodic ranking snapshots in an ordered key-value store, queryable by
//! trader nickname and date window.

pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod ingest;
pub mod key;
pub mod query;
pub mod ranking;
pub mod store;
