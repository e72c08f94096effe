//! Periodic pool statistics.
//!
//! The pool reports roughly once a minute so the web console always sees
//! fresh numbers, but persisting every report would bloat the table.
//! Every report lands in memory; the database only gets a row when the
//! previous stored report for the instance is older than [`STATS_PER`].

use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error};

use ckdb_core::{codec, Timestamp, Transfer, DATE_EOT};

use super::{Store, StoreError};
use crate::storage::{Origin, SimpleDates, TableRow};

/// Minimum gap between stored reports, seconds.
pub const STATS_PER: f64 = 9.5 * 60.0;

/// One statistics report. Append-only: Simple date control, no expiry.
#[derive(Debug, Clone)]
pub struct Poolstat {
    pub poolinstance: String,
    pub users: i32,
    pub workers: i32,
    pub hashrate: f64,
    pub hashrate5m: f64,
    pub hashrate1hr: f64,
    pub hashrate24hr: f64,
    pub dates: SimpleDates,
}

impl TableRow for Poolstat {
    type Key = (String, Timestamp);

    fn key(&self) -> Self::Key {
        (self.poolinstance.clone(), self.dates.createdate)
    }
}

const INSERT: &str = "insert into poolstats \
    (poolinstance,users,workers,hashrate,hashrate5m,hashrate1hr,hashrate24hr,\
    createdate,createby,createcode,createinet) \
    values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)";

const SELECT: &str = "select \
    poolinstance,users,workers,hashrate,hashrate5m,hashrate1hr,hashrate24hr,\
    createdate,createby,createcode,createinet \
    from poolstats";

/// Most recent in-memory report for a pool instance.
#[must_use]
pub fn last_for_instance(store: &Store, poolinstance: &str) -> Option<Arc<Poolstat>> {
    let probe = (poolinstance.to_string(), DATE_EOT);
    let found = store.poolstats.find_before(&probe)?;
    (found.poolinstance == poolinstance).then_some(found)
}

/// Record a statistics report.
///
/// The database insert only happens when `store_db` is set; the memory
/// index is updated either way so the web layer sees the fresh numbers.
///
/// # Errors
///
/// Returns the database failure; nothing is linked then.
#[allow(clippy::too_many_arguments)]
pub async fn add(
    pool: &PgPool,
    store: &Store,
    store_db: bool,
    transfer: &Transfer,
    poolinstance: &str,
    users: &str,
    workers: &str,
    hashrate: &str,
    hashrate5m: &str,
    hashrate1hr: &str,
    hashrate24hr: &str,
    now: Timestamp,
    origin: &Origin,
) -> Result<Arc<Poolstat>, StoreError> {
    debug!("poolstats add {poolinstance} (store={store_db})");

    let mut dates = SimpleDates::new(now, origin);
    dates.apply_transfer(transfer);

    let row = Poolstat {
        poolinstance: poolinstance.to_string(),
        users: codec::parse_i32(users),
        workers: codec::parse_i32(workers),
        hashrate: codec::parse_f64(hashrate),
        hashrate5m: codec::parse_f64(hashrate5m),
        hashrate1hr: codec::parse_f64(hashrate1hr),
        hashrate24hr: codec::parse_f64(hashrate24hr),
        dates,
    };

    if store_db {
        sqlx::query(INSERT)
            .bind(&row.poolinstance)
            .bind(row.users)
            .bind(row.workers)
            .bind(row.hashrate)
            .bind(row.hashrate5m)
            .bind(row.hashrate1hr)
            .bind(row.hashrate24hr)
            .bind(row.dates.createdate.to_utc())
            .bind(&row.dates.createby)
            .bind(&row.dates.createcode)
            .bind(&row.dates.createinet)
            .execute(pool)
            .await
            .map_err(|err| {
                error!("poolstats insert failed: {err}");
                err
            })?;
    }

    Ok(store.poolstats.insert(row))
}

fn decode(row: &PgRow) -> Result<Poolstat, sqlx::Error> {
    Ok(Poolstat {
        poolinstance: row.try_get("poolinstance")?,
        users: row.try_get("users")?,
        workers: row.try_get("workers")?,
        hashrate: row.try_get("hashrate")?,
        hashrate5m: row.try_get("hashrate5m")?,
        hashrate1hr: row.try_get("hashrate1hr")?,
        hashrate24hr: row.try_get("hashrate24hr")?,
        dates: SimpleDates::from_row(row)?,
    })
}

/// Load the statistics history.
///
/// # Errors
///
/// Returns the driver error.
pub async fn fill(pool: &PgPool, store: &Store) -> Result<usize, StoreError> {
    let rows = sqlx::query(SELECT).fetch_all(pool).await.map_err(|err| {
        error!("poolstats select failed: {err}");
        err
    })?;
    for row in &rows {
        store.poolstats.insert(decode(row)?);
    }
    debug!("poolstats fill: {} rows", rows.len());
    Ok(rows.len())
}

/// Purge and refill the statistics index.
///
/// # Errors
///
/// Returns the driver error from the underlying fill.
pub async fn reload(pool: &PgPool, store: &Store) -> Result<usize, StoreError> {
    store.poolstats.clear();
    fill(pool, store).await
}
