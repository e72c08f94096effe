//! Rejected shares. Memory only, with the same referential checks as
//! accepted shares: the error class is only meaningful against a known
//! workinfo and worker.

use std::cmp::Reverse;
use std::sync::Arc;

use tracing::debug;

use ckdb_core::{codec, Timestamp, Transfer};

use super::{workers, workinfo, Store, StoreError};
use crate::storage::{HistoryDates, Origin, TableRow};

/// One rejected share.
#[derive(Debug, Clone)]
pub struct ShareError {
    pub workinfoid: i64,
    pub userid: i64,
    pub workername: String,
    pub clientid: i32,
    /// Error class: stale, duplicate, low-difficulty, ...
    pub errn: i32,
    pub error: String,
    pub secondaryuserid: String,
    pub dates: HistoryDates,
}

impl TableRow for ShareError {
    type Key = (i64, i64, Timestamp, Reverse<Timestamp>);

    fn key(&self) -> Self::Key {
        (
            self.workinfoid,
            self.userid,
            self.dates.createdate,
            Reverse(self.dates.expirydate),
        )
    }
}

/// Mirror a rejected share in memory.
///
/// # Errors
///
/// Same integrity failures as [`super::shares::add`]; the row is dropped
/// on any unresolved reference.
#[allow(clippy::too_many_arguments)]
pub fn add(
    store: &Store,
    transfer: &Transfer,
    workinfoid: &str,
    username: &str,
    workername: &str,
    clientid: &str,
    errn: &str,
    error: &str,
    secondaryuserid: &str,
    now: Timestamp,
    origin: &Origin,
) -> Result<Arc<ShareError>, StoreError> {
    debug!("shareerrors add {workinfoid}/{username}");

    let user = store
        .users
        .find(username)
        .ok_or_else(|| StoreError::UnknownUser(username.to_string()))?;

    let mut dates = HistoryDates::new(now, origin);
    dates.apply_transfer(transfer);

    let row = ShareError {
        workinfoid: codec::parse_i64(workinfoid),
        userid: user.userid,
        workername: workername.to_string(),
        clientid: codec::parse_i32(clientid),
        errn: codec::parse_i32(errn),
        error: error.to_string(),
        secondaryuserid: secondaryuserid.to_string(),
        dates,
    };

    if store
        .workinfo
        .find(&workinfo::live_key(row.workinfoid))
        .is_none()
    {
        return Err(StoreError::MissingWorkinfo(row.workinfoid));
    }
    if store
        .workers
        .find(&workers::live_key(row.userid, &row.workername))
        .is_none()
    {
        return Err(StoreError::MissingWorker {
            userid: row.userid,
            workername: row.workername.clone(),
        });
    }

    Ok(store.shareerrors.insert(row))
}

/// Bootstrap load.
///
/// Share errors are never read back from the database.
// TODO: ingest from the sharelog file alongside shares::fill.
pub fn fill(store: &Store) {
    let _ = store;
}

#[cfg(test)]
mod tests {
    use super::super::users::tests::seed_user;
    use super::super::workers::tests::seed_worker;
    use super::super::workinfo::tests::seed_workinfo;
    use super::*;

    fn try_add(store: &Store, workinfoid: &str) -> Result<Arc<ShareError>, StoreError> {
        let origin = Origin::new("pool", "shareerrors", "127.0.0.1");
        add(
            store,
            &Transfer::new(),
            workinfoid,
            "alice",
            "alice.rig1",
            "42",
            "21",
            "SHARE_STALE",
            "unused",
            Timestamp::now(),
            &origin,
        )
    }

    #[test]
    fn rejected_share_links_with_error_class() {
        let store = Store::new();
        seed_user(&store, 667, "alice", "ab");
        seed_worker(&store, 3, 667, "alice.rig1");
        seed_workinfo(&store, 6_000_000_001);

        let row = try_add(&store, "6000000001").unwrap();
        assert_eq!(row.errn, 21);
        assert_eq!(row.error, "SHARE_STALE");
        assert_eq!(store.shareerrors.len(), 1);
    }

    #[test]
    fn integrity_checks_still_apply() {
        let store = Store::new();
        seed_user(&store, 667, "alice", "ab");
        seed_worker(&store, 3, 667, "alice.rig1");
        // No workinfo seeded.
        assert!(matches!(
            try_add(&store, "6000000001").unwrap_err(),
            StoreError::MissingWorkinfo(_)
        ));
        assert!(store.shareerrors.is_empty());
    }
}
