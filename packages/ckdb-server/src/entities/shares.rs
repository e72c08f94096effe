//! Accepted shares. Memory only: the pool process writes these to its
//! own sharelog file, so the daemon mirrors them for joins and stats but
//! never inserts them into the database.
//!
//! Referential integrity is enforced on ingest: a share must name a
//! workinfo and an authorised worker that both already exist, otherwise
//! the row is dropped.

use std::cmp::Reverse;
use std::sync::Arc;

use tracing::debug;

use ckdb_core::{codec, Timestamp, Transfer};

use super::{workers, workinfo, Store, StoreError};
use crate::storage::{HistoryDates, Origin, TableRow};

/// One accepted share.
#[derive(Debug, Clone)]
pub struct Share {
    pub workinfoid: i64,
    pub userid: i64,
    pub workername: String,
    pub clientid: i32,
    pub enonce1: String,
    pub nonce2: String,
    pub nonce: String,
    pub diff: f64,
    pub sdiff: f64,
    /// Error class, zero for accepted shares.
    pub errn: i32,
    pub error: String,
    pub secondaryuserid: String,
    pub dates: HistoryDates,
}

impl TableRow for Share {
    type Key = (i64, i64, Timestamp, String, Reverse<Timestamp>);

    fn key(&self) -> Self::Key {
        (
            self.workinfoid,
            self.userid,
            self.dates.createdate,
            self.nonce.clone(),
            Reverse(self.dates.expirydate),
        )
    }
}

/// Mirror an accepted share in memory.
///
/// # Errors
///
/// Returns [`StoreError::UnknownUser`], [`StoreError::MissingWorkinfo`]
/// or [`StoreError::MissingWorker`] when a reference cannot be resolved;
/// the share is dropped in every failure case.
#[allow(clippy::too_many_arguments)]
pub fn add(
    store: &Store,
    transfer: &Transfer,
    workinfoid: &str,
    username: &str,
    workername: &str,
    clientid: &str,
    enonce1: &str,
    nonce2: &str,
    nonce: &str,
    diff: &str,
    sdiff: &str,
    secondaryuserid: &str,
    now: Timestamp,
    origin: &Origin,
) -> Result<Arc<Share>, StoreError> {
    debug!("shares add {workinfoid}/{username}");

    let user = store
        .users
        .find(username)
        .ok_or_else(|| StoreError::UnknownUser(username.to_string()))?;

    let mut dates = HistoryDates::new(now, origin);
    dates.apply_transfer(transfer);

    let share = Share {
        workinfoid: codec::parse_i64(workinfoid),
        userid: user.userid,
        workername: workername.to_string(),
        clientid: codec::parse_i32(clientid),
        enonce1: enonce1.to_string(),
        nonce2: nonce2.to_string(),
        nonce: nonce.to_string(),
        diff: codec::parse_f64(diff),
        sdiff: codec::parse_f64(sdiff),
        errn: 0,
        error: String::new(),
        secondaryuserid: secondaryuserid.to_string(),
        dates,
    };

    if store
        .workinfo
        .find(&workinfo::live_key(share.workinfoid))
        .is_none()
    {
        return Err(StoreError::MissingWorkinfo(share.workinfoid));
    }
    if store
        .workers
        .find(&workers::live_key(share.userid, &share.workername))
        .is_none()
    {
        return Err(StoreError::MissingWorker {
            userid: share.userid,
            workername: share.workername.clone(),
        });
    }

    Ok(store.shares.insert(share))
}

/// Bootstrap load.
///
/// Shares are never read back from the database.
// TODO: ingest the pool's sharelog file here, re-verifying the workinfo
// and worker references for each line.
pub fn fill(store: &Store) {
    let _ = store;
}
