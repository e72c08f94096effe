//! Workers: one row per (user, rig name).
//!
//! The authorise path auto-provisions a worker with default settings the
//! first time a rig shows up. Settings changes use the
//! history-preserving transaction: expire the live row, insert the
//! replacement, and only then swap the in-memory version.

use std::cmp::Reverse;
use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error};

use ckdb_core::{codec, Timestamp, DEFAULT_EXPIRY};

use super::{Store, StoreError};
use crate::db;
use crate::storage::{HistoryDates, Origin, TableRow};

pub const DIFFICULTY_DEFAULT_MIN: i32 = 10;
pub const DIFFICULTY_DEFAULT_MAX: i32 = 1_000_000;
pub const DIFFICULTY_DEFAULT: i32 = DIFFICULTY_DEFAULT_MIN;

pub const IDLE_NOTIFICATION_ENABLED: &str = "y";
pub const IDLE_NOTIFICATION_DISABLED: &str = " ";
pub const IDLE_NOTIFICATION_DEFAULT: &str = IDLE_NOTIFICATION_DISABLED;

pub const IDLE_NOTIFICATION_TIME_MIN: i32 = 10;
pub const IDLE_NOTIFICATION_TIME_MAX: i32 = 60;
pub const IDLE_NOTIFICATION_TIME_DEFAULT: i32 = IDLE_NOTIFICATION_TIME_MIN;

/// One worker row.
#[derive(Debug, Clone)]
pub struct Worker {
    pub workerid: i64,
    pub userid: i64,
    /// Includes the username prefix, e.g. `alice.rig1`.
    pub workername: String,
    pub difficultydefault: i32,
    /// `"y"` or `" "`.
    pub idlenotificationenabled: String,
    /// Minutes, within [10, 60].
    pub idlenotificationtime: i32,
    pub dates: HistoryDates,
}

impl TableRow for Worker {
    type Key = (i64, String, Reverse<Timestamp>);

    fn key(&self) -> Self::Key {
        (
            self.userid,
            self.workername.clone(),
            Reverse(self.dates.expirydate),
        )
    }
}

/// Probe key for the live row of `(userid, workername)`.
#[must_use]
pub fn live_key(userid: i64, workername: &str) -> <Worker as TableRow>::Key {
    (userid, workername.to_string(), Reverse(DEFAULT_EXPIRY))
}

const INSERT: &str = "insert into workers \
    (workerid,userid,workername,difficultydefault,\
    idlenotificationenabled,idlenotificationtime,\
    createdate,createby,createcode,createinet,expirydate) \
    values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)";

const SELECT: &str = "select \
    workerid,userid,workername,difficultydefault,\
    idlenotificationenabled,idlenotificationtime,\
    createdate,createby,createcode,createinet,expirydate \
    from workers where expirydate = $1";

/// Resolve the difficulty setting for a new row: clamp into range,
/// default when absent.
fn add_difficulty(value: Option<&str>) -> i32 {
    match value {
        Some(text) if !text.is_empty() => {
            codec::parse_i32(text).clamp(DIFFICULTY_DEFAULT_MIN, DIFFICULTY_DEFAULT_MAX)
        }
        _ => DIFFICULTY_DEFAULT,
    }
}

fn flag_of(value: &str) -> &'static str {
    if value
        .chars()
        .next()
        .is_some_and(|c| c.to_ascii_lowercase() == 'y')
    {
        IDLE_NOTIFICATION_ENABLED
    } else {
        IDLE_NOTIFICATION_DISABLED
    }
}

/// Register a new worker, allocating its id.
///
/// # Errors
///
/// Returns [`StoreError`] on id allocation or insert failure; nothing is
/// linked in that case.
pub async fn add(
    pool: &PgPool,
    store: &Store,
    userid: i64,
    workername: &str,
    difficultydefault: Option<&str>,
    idlenotificationenabled: Option<&str>,
    idlenotificationtime: Option<&str>,
    now: Timestamp,
    origin: &Origin,
) -> Result<Arc<Worker>, StoreError> {
    debug!("workers add {userid}/{workername}");

    let workerid = db::next_id(pool, "workerid", 1, now, origin).await?;

    let difficulty = add_difficulty(difficultydefault);
    let mut enabled = match idlenotificationenabled {
        Some(text) if !text.is_empty() => flag_of(text),
        _ => IDLE_NOTIFICATION_DEFAULT,
    };
    let idle_time = match idlenotificationtime {
        Some(text) if !text.is_empty() => {
            let minutes = codec::parse_i32(text);
            if minutes < IDLE_NOTIFICATION_TIME_MIN {
                // Too-eager notification requests disable the feature.
                enabled = IDLE_NOTIFICATION_DISABLED;
                IDLE_NOTIFICATION_TIME_MIN
            } else {
                minutes.min(IDLE_NOTIFICATION_TIME_MAX)
            }
        }
        _ => IDLE_NOTIFICATION_TIME_DEFAULT,
    };

    let worker = Worker {
        workerid,
        userid,
        workername: workername.to_string(),
        difficultydefault: difficulty,
        idlenotificationenabled: enabled.to_string(),
        idlenotificationtime: idle_time,
        dates: HistoryDates::new(now, origin),
    };

    insert_row(pool, &worker).await.map_err(|err| {
        error!("workers insert failed: {err}");
        err
    })?;

    Ok(store.workers.insert(worker))
}

async fn insert_row(pool: &PgPool, worker: &Worker) -> Result<(), sqlx::Error> {
    sqlx::query(INSERT)
        .bind(worker.workerid)
        .bind(worker.userid)
        .bind(&worker.workername)
        .bind(worker.difficultydefault)
        .bind(&worker.idlenotificationenabled)
        .bind(worker.idlenotificationtime)
        .bind(worker.dates.createdate.to_utc())
        .bind(&worker.dates.createby)
        .bind(&worker.dates.createcode)
        .bind(&worker.dates.createinet)
        .bind(worker.dates.expirydate.to_utc())
        .execute(pool)
        .await?;
    Ok(())
}

/// Resolve one updated setting: absent or out-of-range keeps the current
/// value.
fn update_difficulty(current: i32, value: Option<&str>) -> i32 {
    match value {
        Some(text) if !text.is_empty() => {
            let diff = codec::parse_i32(text);
            if (DIFFICULTY_DEFAULT_MIN..=DIFFICULTY_DEFAULT_MAX).contains(&diff) {
                diff
            } else {
                current
            }
        }
        _ => current,
    }
}

fn update_idle_time(current: i32, value: Option<&str>) -> i32 {
    match value {
        Some(text) if !text.is_empty() => {
            let minutes = codec::parse_i32(text);
            if (IDLE_NOTIFICATION_TIME_MIN..=IDLE_NOTIFICATION_TIME_MAX).contains(&minutes) {
                minutes
            } else {
                current
            }
        }
        _ => current,
    }
}

/// Change a worker's settings with the history-preserving transaction.
///
/// A no-op (returning the current row) when nothing actually changes.
/// Otherwise: within one transaction the live database row is expired
/// and the replacement inserted; the in-memory row is swapped only after
/// the commit.
///
/// # Errors
///
/// Returns [`StoreError`] on any statement failure; the transaction
/// rolls back and memory is untouched.
pub async fn update(
    pool: &PgPool,
    store: &Store,
    current: &Arc<Worker>,
    difficultydefault: Option<&str>,
    idlenotificationenabled: Option<&str>,
    idlenotificationtime: Option<&str>,
    now: Timestamp,
    origin: &Origin,
) -> Result<Arc<Worker>, StoreError> {
    debug!("workers update {}/{}", current.userid, current.workername);

    let difficulty = update_difficulty(current.difficultydefault, difficultydefault);
    let enabled = match idlenotificationenabled {
        Some(text) if !text.is_empty() => flag_of(text),
        _ => current.idlenotificationenabled.as_str(),
    };
    let idle_time = update_idle_time(current.idlenotificationtime, idlenotificationtime);

    if difficulty == current.difficultydefault
        && enabled == current.idlenotificationenabled
        && idle_time == current.idlenotificationtime
    {
        return Ok(Arc::clone(current));
    }

    let replacement = Worker {
        workerid: current.workerid,
        userid: current.userid,
        workername: current.workername.clone(),
        difficultydefault: difficulty,
        idlenotificationenabled: enabled.to_string(),
        idlenotificationtime: idle_time,
        dates: HistoryDates::new(now, origin),
    };

    let mut tx = pool.begin().await.map_err(StoreError::from)?;
    db::expire_live_row(&mut tx, "workers", "workerid = $2", current.workerid, now).await?;
    sqlx::query(INSERT)
        .bind(replacement.workerid)
        .bind(replacement.userid)
        .bind(&replacement.workername)
        .bind(replacement.difficultydefault)
        .bind(&replacement.idlenotificationenabled)
        .bind(replacement.idlenotificationtime)
        .bind(replacement.dates.createdate.to_utc())
        .bind(&replacement.dates.createby)
        .bind(&replacement.dates.createcode)
        .bind(&replacement.dates.createinet)
        .bind(replacement.dates.expirydate.to_utc())
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            error!("workers history insert failed: {err}");
            err
        })?;
    tx.commit().await.map_err(StoreError::from)?;

    Ok(store.workers.expire_and_replace(&current.key(), replacement))
}

/// Find the live worker, or provision one with the supplied settings.
/// With `update` set, an existing worker also has its settings applied.
///
/// # Errors
///
/// Propagates [`StoreError`] from the add or update leg.
pub async fn new_worker(
    pool: &PgPool,
    store: &Store,
    apply_update: bool,
    userid: i64,
    workername: &str,
    difficultydefault: Option<&str>,
    idlenotificationenabled: Option<&str>,
    idlenotificationtime: Option<&str>,
    now: Timestamp,
    origin: &Origin,
) -> Result<Arc<Worker>, StoreError> {
    match store.workers.find(&live_key(userid, workername)) {
        Some(existing) => {
            if apply_update {
                update(
                    pool,
                    store,
                    &existing,
                    difficultydefault,
                    idlenotificationenabled,
                    idlenotificationtime,
                    now,
                    origin,
                )
                .await
            } else {
                Ok(existing)
            }
        }
        None => {
            add(
                pool,
                store,
                userid,
                workername,
                difficultydefault,
                idlenotificationenabled,
                idlenotificationtime,
                now,
                origin,
            )
            .await
        }
    }
}

fn decode(row: &PgRow) -> Result<Worker, sqlx::Error> {
    Ok(Worker {
        workerid: row.try_get("workerid")?,
        userid: row.try_get("userid")?,
        workername: row.try_get("workername")?,
        difficultydefault: row.try_get("difficultydefault")?,
        idlenotificationenabled: row.try_get("idlenotificationenabled")?,
        idlenotificationtime: row.try_get("idlenotificationtime")?,
        dates: HistoryDates::from_row(row)?,
    })
}

/// Load every live worker row.
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
            error!("workers select failed: {err}");
            err
        })?;
    for row in &rows {
        store.workers.insert(decode(row)?);
    }
    debug!("workers fill: {} rows", rows.len());
    Ok(rows.len())
}

/// Purge and refill the worker index.
///
/// # Errors
///
/// Returns the driver error from the underlying fill.
pub async fn reload(pool: &PgPool, store: &Store) -> Result<usize, StoreError> {
    store.workers.clear();
    fill(pool, store).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a live worker row directly, for tests that bypass the
    /// database.
    pub(crate) fn seed_worker(store: &Store, workerid: i64, userid: i64, workername: &str) -> Arc<Worker> {
        let origin = Origin::new("test", "seed", "127.0.0.1");
        store.workers.insert(Worker {
            workerid,
            userid,
            workername: workername.to_string(),
            difficultydefault: DIFFICULTY_DEFAULT,
            idlenotificationenabled: IDLE_NOTIFICATION_DEFAULT.to_string(),
            idlenotificationtime: IDLE_NOTIFICATION_TIME_DEFAULT,
            dates: HistoryDates::new(
                Timestamp {
                    sec: 1_400_000_000,
                    usec: 0,
                },
                &origin,
            ),
        })
    }

    #[test]
    fn live_key_finds_seeded_worker() {
        let store = Store::new();
        seed_worker(&store, 3, 667, "alice.rig1");
        assert!(store.workers.find(&live_key(667, "alice.rig1")).is_some());
        assert!(store.workers.find(&live_key(667, "alice.rig2")).is_none());
        assert!(store.workers.find(&live_key(1, "alice.rig1")).is_none());
    }

    #[test]
    fn add_difficulty_clamps() {
        assert_eq!(add_difficulty(None), DIFFICULTY_DEFAULT);
        assert_eq!(add_difficulty(Some("")), DIFFICULTY_DEFAULT);
        assert_eq!(add_difficulty(Some("256")), 256);
        assert_eq!(add_difficulty(Some("3")), DIFFICULTY_DEFAULT_MIN);
        assert_eq!(add_difficulty(Some("9999999")), DIFFICULTY_DEFAULT_MAX);
    }

    #[test]
    fn update_settings_keep_current_when_out_of_range() {
        assert_eq!(update_difficulty(512, None), 512);
        assert_eq!(update_difficulty(512, Some("3")), 512);
        assert_eq!(update_difficulty(512, Some("1024")), 1024);
        assert_eq!(update_idle_time(30, Some("5")), 30);
        assert_eq!(update_idle_time(30, Some("61")), 30);
        assert_eq!(update_idle_time(30, Some("45")), 45);
    }

    #[test]
    fn flag_normalisation() {
        assert_eq!(flag_of("y"), IDLE_NOTIFICATION_ENABLED);
        assert_eq!(flag_of("Yes"), IDLE_NOTIFICATION_ENABLED);
        assert_eq!(flag_of("n"), IDLE_NOTIFICATION_DISABLED);
        assert_eq!(flag_of("anything"), IDLE_NOTIFICATION_DISABLED);
    }
}
