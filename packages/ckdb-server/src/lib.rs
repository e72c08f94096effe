//! `ckdb` server -- the accounting/persistence daemon for a mining pool.
//!
//! Ingests the pool's event stream (work units, shares, authorisations,
//! statistics) and the web console's queries over a local socket,
//! persists history-preserving rows to `PostgreSQL`, and mirrors the
//! live working set in memory so lookups and joins never round-trip to
//! the database.

pub mod config;
pub mod db;
pub mod entities;
pub mod network;
pub mod service;
pub mod storage;

pub use config::{DbConfig, ServerConfig};
pub use db::DbError;
pub use entities::{Store, StoreError};
pub use network::ShutdownController;
pub use service::{dispatch, HandlerContext};
pub use storage::{HistoryDates, ModifyDates, Origin, SimpleDates, TableRow, TemporalTable};
