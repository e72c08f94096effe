//! Payments made to users.
//!
//! Rows are written by the payout tooling, not by this daemon: the
//! memory index is load-only and serves the web console's per-user
//! listing in paydate order.

use std::cmp::Reverse;
use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error};

use ckdb_core::{Timestamp, DEFAULT_EXPIRY};

use super::{Store, StoreError};
use crate::storage::{get_stamp, HistoryDates, TableRow};

/// One payment row.
#[derive(Debug, Clone)]
pub struct Payment {
    pub paymentid: i64,
    pub userid: i64,
    pub paydate: Timestamp,
    pub payaddress: String,
    pub originaltxn: String,
    /// Satoshis.
    pub amount: i64,
    pub committxn: String,
    pub commitblockhash: String,
    pub dates: HistoryDates,
}

impl TableRow for Payment {
    type Key = (i64, Timestamp, String, Reverse<Timestamp>);

    fn key(&self) -> Self::Key {
        (
            self.userid,
            self.paydate,
            self.payaddress.clone(),
            Reverse(self.dates.expirydate),
        )
    }
}

const SELECT: &str = "select \
    paymentid,userid,paydate,payaddress,originaltxn,amount,committxn,commitblockhash,\
    createdate,createby,createcode,createinet,expirydate \
    from payments where expirydate = $1";

/// Every payment for a user, paydate ascending.
#[must_use]
pub fn for_user(store: &Store, userid: i64) -> Vec<Arc<Payment>> {
    let probe = (
        userid,
        Timestamp::ZERO,
        String::new(),
        Reverse(DEFAULT_EXPIRY),
    );
    store
        .payments
        .collect_after(&probe, |payment| payment.userid == userid)
}

fn decode(row: &PgRow) -> Result<Payment, sqlx::Error> {
    Ok(Payment {
        paymentid: row.try_get("paymentid")?,
        userid: row.try_get("userid")?,
        paydate: get_stamp(row, "paydate")?,
        payaddress: row.try_get("payaddress")?,
        originaltxn: row.try_get("originaltxn")?,
        amount: row.try_get("amount")?,
        committxn: row.try_get("committxn")?,
        commitblockhash: row.try_get("commitblockhash")?,
        dates: HistoryDates::from_row(row)?,
    })
}

/// Load every live payment row.
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
            error!("payments select failed: {err}");
            err
        })?;
    for row in &rows {
        store.payments.insert(decode(row)?);
    }
    debug!("payments fill: {} rows", rows.len());
    Ok(rows.len())
}

/// Purge and refill the payment index.
///
/// # Errors
///
/// Returns the driver error from the underlying fill.
pub async fn reload(pool: &PgPool, store: &Store) -> Result<usize, StoreError> {
    store.payments.clear();
    fill(pool, store).await
}
