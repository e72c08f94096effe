//! Worker authorisations.
//!
//! Each successful authorisation records an auths row and hands the
//! user's `secondaryuserid` back to the pool as its identity token. An
//! unknown rig name is auto-provisioned as a worker with default
//! settings before the auth row is written.

use std::cmp::Reverse;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, warn};

use ckdb_core::{codec, Timestamp, Transfer, DEFAULT_EXPIRY};

use super::{workers, Store, StoreError};
use crate::db;
use crate::storage::{HistoryDates, Origin, TableRow};

/// One authorisation row.
#[derive(Debug, Clone)]
pub struct Auth {
    pub authid: i64,
    pub userid: i64,
    pub workername: String,
    pub clientid: i32,
    pub enonce1: String,
    pub useragent: String,
    pub dates: HistoryDates,
}

impl TableRow for Auth {
    type Key = (i64, i64, Timestamp, Reverse<Timestamp>);

    fn key(&self) -> Self::Key {
        (
            self.authid,
            self.userid,
            self.dates.createdate,
            Reverse(self.dates.expirydate),
        )
    }
}

const INSERT: &str = "insert into auths \
    (authid,userid,workername,clientid,enonce1,useragent,\
    createdate,createby,createcode,createinet,expirydate) \
    values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)";

const SELECT: &str = "select \
    authid,userid,workername,clientid,enonce1,useragent,\
    createdate,createby,createcode,createinet,expirydate \
    from auths where expirydate = $1";

/// Authorise a worker, returning the user's `secondaryuserid`.
///
/// The worker record is provisioned first when missing; a provisioning
/// failure is logged but does not fail the authorisation, matching the
/// daemon's historical behaviour.
///
/// # Errors
///
/// Returns [`StoreError::UnknownUser`] for an unregistered username,
/// or the database failure from id allocation / insert.
#[allow(clippy::too_many_arguments)]
pub async fn add(
    pool: &PgPool,
    store: &Store,
    transfer: &Transfer,
    username: &str,
    workername: &str,
    clientid: &str,
    enonce1: &str,
    useragent: &str,
    now: Timestamp,
    origin: &Origin,
) -> Result<String, StoreError> {
    debug!("auths add {username}/{workername}");

    let user = store
        .users
        .find(username)
        .ok_or_else(|| StoreError::UnknownUser(username.to_string()))?;

    if let Err(err) = workers::new_worker(
        pool, store, false, user.userid, workername, None, None, None, now, origin,
    )
    .await
    {
        warn!("worker auto-provision failed for {username}/{workername}: {err}");
    }

    let mut dates = HistoryDates::new(now, origin);
    dates.apply_transfer(transfer);

    let authid = db::next_id(pool, "authid", 1, now, origin).await?;

    let auth = Auth {
        authid,
        userid: user.userid,
        workername: workername.to_string(),
        clientid: codec::parse_i32(clientid),
        enonce1: enonce1.to_string(),
        useragent: useragent.to_string(),
        dates,
    };

    sqlx::query(INSERT)
        .bind(auth.authid)
        .bind(auth.userid)
        .bind(&auth.workername)
        .bind(auth.clientid)
        .bind(&auth.enonce1)
        .bind(&auth.useragent)
        .bind(auth.dates.createdate.to_utc())
        .bind(&auth.dates.createby)
        .bind(&auth.dates.createcode)
        .bind(&auth.dates.createinet)
        .bind(auth.dates.expirydate.to_utc())
        .execute(pool)
        .await
        .map_err(|err| {
            error!("auths insert failed: {err}");
            err
        })?;

    store.auths.insert(auth);
    Ok(user.secondaryuserid.clone())
}

fn decode(row: &PgRow) -> Result<Auth, sqlx::Error> {
    Ok(Auth {
        authid: row.try_get("authid")?,
        userid: row.try_get("userid")?,
        workername: row.try_get("workername")?,
        clientid: row.try_get("clientid")?,
        enonce1: row.try_get("enonce1")?,
        useragent: row.try_get("useragent")?,
        dates: HistoryDates::from_row(row)?,
    })
}

/// Load every live auth row.
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
            error!("auths select failed: {err}");
            err
        })?;
    for row in &rows {
        store.auths.insert(decode(row)?);
    }
    debug!("auths fill: {} rows", rows.len());
    Ok(rows.len())
}

/// Purge and refill the auth index.
///
/// # Errors
///
/// Returns the driver error from the underlying fill.
pub async fn reload(pool: &PgPool, store: &Store) -> Result<usize, StoreError> {
    store.auths.clear();
    fill(pool, store).await
}
