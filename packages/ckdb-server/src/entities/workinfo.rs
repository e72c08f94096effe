//! Block-template work units issued by the pool.
//!
//! The workinfoid comes from the pool process, not from idcontrol. The
//! transaction tree and merkle branch list are unbounded text blobs, so
//! this is the one table whose reload is not supported: the working set
//! is filled once at bootstrap and then fed purely by the ingest stream.

use std::cmp::Reverse;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error};

use ckdb_core::{codec, Timestamp, Transfer, DEFAULT_EXPIRY};

use super::{Store, StoreError};
use crate::storage::{HistoryDates, Origin, TableRow};

/// One work unit.
#[derive(Debug, Clone)]
pub struct Workinfo {
    pub workinfoid: i64,
    pub poolinstance: String,
    /// Blob: the full transaction tree.
    pub transactiontree: String,
    /// Blob: space-joined merkle branch list.
    pub merklehash: String,
    pub prevhash: String,
    pub coinbase1: String,
    pub coinbase2: String,
    pub version: String,
    pub bits: String,
    pub ntime: String,
    /// Satoshis.
    pub reward: i64,
    pub dates: HistoryDates,
}

impl TableRow for Workinfo {
    type Key = (i64, Reverse<Timestamp>);

    fn key(&self) -> Self::Key {
        (self.workinfoid, Reverse(self.dates.expirydate))
    }
}

/// Probe key for the live row of a workinfoid.
#[must_use]
pub fn live_key(workinfoid: i64) -> <Workinfo as TableRow>::Key {
    (workinfoid, Reverse(DEFAULT_EXPIRY))
}

const INSERT: &str = "insert into workinfo \
    (workinfoid,poolinstance,transactiontree,merklehash,prevhash,\
    coinbase1,coinbase2,version,bits,ntime,reward,\
    createdate,createby,createcode,createinet,expirydate) \
    values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)";

const SELECT: &str = "select \
    workinfoid,poolinstance,transactiontree,merklehash,prevhash,\
    coinbase1,coinbase2,version,bits,ntime,reward,\
    createdate,createby,createcode,createinet,expirydate \
    from workinfo where expirydate = $1";

/// Record a work unit from the ingest stream.
///
/// Returns the workinfoid on success.
///
/// # Errors
///
/// Returns [`StoreError`] on insert failure; nothing is linked then.
#[allow(clippy::too_many_arguments)]
pub async fn add(
    pool: &PgPool,
    store: &Store,
    transfer: &Transfer,
    workinfoid: &str,
    poolinstance: &str,
    transactiontree: &str,
    merklehash: &str,
    prevhash: &str,
    coinbase1: &str,
    coinbase2: &str,
    version: &str,
    bits: &str,
    ntime: &str,
    reward: &str,
    now: Timestamp,
    origin: &Origin,
) -> Result<i64, StoreError> {
    debug!("workinfo add {workinfoid}");

    let mut dates = HistoryDates::new(now, origin);
    dates.apply_transfer(transfer);

    let row = Workinfo {
        workinfoid: codec::parse_i64(workinfoid),
        poolinstance: poolinstance.to_string(),
        transactiontree: transactiontree.to_string(),
        merklehash: merklehash.to_string(),
        prevhash: prevhash.to_string(),
        coinbase1: coinbase1.to_string(),
        coinbase2: coinbase2.to_string(),
        version: version.to_string(),
        bits: bits.to_string(),
        ntime: ntime.to_string(),
        reward: codec::parse_i64(reward),
        dates,
    };

    sqlx::query(INSERT)
        .bind(row.workinfoid)
        .bind(&row.poolinstance)
        .bind(&row.transactiontree)
        .bind(&row.merklehash)
        .bind(&row.prevhash)
        .bind(&row.coinbase1)
        .bind(&row.coinbase2)
        .bind(&row.version)
        .bind(&row.bits)
        .bind(&row.ntime)
        .bind(row.reward)
        .bind(row.dates.createdate.to_utc())
        .bind(&row.dates.createby)
        .bind(&row.dates.createcode)
        .bind(&row.dates.createinet)
        .bind(row.dates.expirydate.to_utc())
        .execute(pool)
        .await
        .map_err(|err| {
            error!("workinfo insert failed: {err}");
            err
        })?;

    let linked = store.workinfo.insert(row);
    Ok(linked.workinfoid)
}

fn decode(row: &PgRow) -> Result<Workinfo, sqlx::Error> {
    Ok(Workinfo {
        workinfoid: row.try_get("workinfoid")?,
        poolinstance: row.try_get("poolinstance")?,
        transactiontree: row.try_get("transactiontree")?,
        merklehash: row.try_get("merklehash")?,
        prevhash: row.try_get("prevhash")?,
        coinbase1: row.try_get("coinbase1")?,
        coinbase2: row.try_get("coinbase2")?,
        version: row.try_get("version")?,
        bits: row.try_get("bits")?,
        ntime: row.try_get("ntime")?,
        reward: row.try_get("reward")?,
        dates: HistoryDates::from_row(row)?,
    })
}

/// Load every live work unit at bootstrap.
///
/// # Errors
///
/// Returns the driver error.
pub async fn fill(pool: &PgPool, store: &Store) -> Result<usize, StoreError> {
    let rows = sqlx::query(SELECT)
        .bind(DEFAULT_EXPIRY.to_utc())
        .fetch_all(pool)
        .await
        .map_err(|err| {
            error!("workinfo select failed: {err}");
            err
        })?;
    for row in &rows {
        store.workinfo.insert(decode(row)?);
    }
    debug!("workinfo fill: {} rows", rows.len());
    Ok(rows.len())
}
