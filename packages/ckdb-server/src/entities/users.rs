//! User accounts.
//!
//! Users are indexed twice under one lock: by username (the lookup every
//! handler starts from) and by userid (joins from other entities). At
//! most one live row exists per username; `userid` values are allocated
//! with a uniform random gap in [666, 999] so account volume cannot be
//! read off the id sequence.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error};

use ckdb_core::{secondary_user_id, Timestamp, DEFAULT_EXPIRY};

use super::{Store, StoreError};
use crate::db;
use crate::storage::{get_stamp, HistoryDates, Origin};

/// Username index key: live probe is `(name, Reverse(DEFAULT_EXPIRY))`.
pub type UserKey = (String, Reverse<Timestamp>);
/// Userid index key.
pub type UserIdKey = (i64, Reverse<Timestamp>);

/// One user row.
#[derive(Debug, Clone)]
pub struct User {
    pub userid: i64,
    pub username: String,
    pub emailaddress: String,
    pub joineddate: Timestamp,
    pub passwordhash: String,
    pub secondaryuserid: String,
    pub dates: HistoryDates,
}

#[derive(Debug, Default)]
struct UserIndexes {
    by_username: BTreeMap<UserKey, Arc<User>>,
    by_userid: BTreeMap<UserIdKey, Arc<User>>,
}

/// Both user indexes behind one lock, so a row is always visible in
/// either both or neither.
#[derive(Debug, Default)]
pub struct UsersTable {
    inner: RwLock<UserIndexes>,
}

impl UsersTable {
    /// Live row for a username.
    #[must_use]
    pub fn find(&self, username: &str) -> Option<Arc<User>> {
        let key = (username.to_string(), Reverse(DEFAULT_EXPIRY));
        self.inner.read().by_username.get(&key).cloned()
    }

    /// Live row for a userid.
    #[must_use]
    pub fn find_by_id(&self, userid: i64) -> Option<Arc<User>> {
        let key = (userid, Reverse(DEFAULT_EXPIRY));
        self.inner.read().by_userid.get(&key).cloned()
    }

    /// Link a row into both indexes.
    pub fn link(&self, user: User) -> Arc<User> {
        let user = Arc::new(user);
        let mut inner = self.inner.write();
        inner.by_username.insert(
            (user.username.clone(), Reverse(user.dates.expirydate)),
            Arc::clone(&user),
        );
        inner
            .by_userid
            .insert((user.userid, Reverse(user.dates.expirydate)), Arc::clone(&user));
        user
    }

    /// Drop every row (reload support).
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_username.clear();
        inner.by_userid.clear();
    }

    /// Number of rows held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_username.len()
    }

    /// Whether the table holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_username.is_empty()
    }
}

const INSERT: &str = "insert into users \
    (userid,username,emailaddress,joineddate,passwordhash,secondaryuserid,\
    createdate,createby,createcode,createinet,expirydate) \
    values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)";

const SELECT: &str = "select \
    userid,username,emailaddress,joineddate,passwordhash,secondaryuserid,\
    createdate,createby,createcode,createinet,expirydate \
    from users where expirydate = $1";

/// Register a new user.
///
/// Allocates the userid with the privacy gap, inserts, and links the row
/// into the indexes only after the database acknowledged it.
///
/// # Errors
///
/// Returns [`StoreError`] on id allocation or insert failure; the
/// in-memory indexes are untouched in that case.
pub async fn add(
    pool: &PgPool,
    store: &Store,
    username: &str,
    emailaddress: &str,
    passwordhash: &str,
    now: Timestamp,
    origin: &Origin,
) -> Result<Arc<User>, StoreError> {
    debug!("users add '{username}'");

    let gap = rand::rng().random_range(666..=999);
    let userid = db::next_id(pool, "userid", gap, now, origin).await?;

    let dates = HistoryDates::new(now, origin);
    let user = User {
        userid,
        username: username.to_string(),
        emailaddress: emailaddress.to_string(),
        joineddate: dates.createdate,
        passwordhash: passwordhash.to_string(),
        secondaryuserid: secondary_user_id(username, emailaddress),
        dates,
    };

    sqlx::query(INSERT)
        .bind(user.userid)
        .bind(&user.username)
        .bind(&user.emailaddress)
        .bind(user.joineddate.to_utc())
        .bind(&user.passwordhash)
        .bind(&user.secondaryuserid)
        .bind(user.dates.createdate.to_utc())
        .bind(&user.dates.createby)
        .bind(&user.dates.createcode)
        .bind(&user.dates.createinet)
        .bind(user.dates.expirydate.to_utc())
        .execute(pool)
        .await
        .map_err(|err| {
            error!("users insert failed: {err}");
            err
        })?;

    Ok(store.users.link(user))
}

fn decode(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        userid: row.try_get("userid")?,
        username: row.try_get("username")?,
        emailaddress: row.try_get("emailaddress")?,
        joineddate: get_stamp(row, "joineddate")?,
        passwordhash: row.try_get("passwordhash")?,
        secondaryuserid: row.try_get("secondaryuserid")?,
        dates: HistoryDates::from_row(row)?,
    })
}

/// Load every live user row into the indexes.
///
/// # Errors
///
/// Returns the driver error; rows decoded before the failure stay
/// linked.
pub async fn fill(pool: &PgPool, store: &Store) -> Result<usize, StoreError> {
    let rows = sqlx::query(SELECT)
        .bind(DEFAULT_EXPIRY.to_utc())
        .fetch_all(pool)
        .await
        .map_err(|err| {
            error!("users select failed: {err}");
            err
        })?;
    for row in &rows {
        store.users.link(decode(row)?);
    }
    debug!("users fill: {} rows", rows.len());
    Ok(rows.len())
}

/// Purge and refill the user indexes.
///
/// # Errors
///
/// Returns the driver error from the underlying fill.
pub async fn reload(pool: &PgPool, store: &Store) -> Result<usize, StoreError> {
    store.users.clear();
    fill(pool, store).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a live user row directly, for tests that bypass the
    /// database.
    pub(crate) fn seed_user(store: &Store, userid: i64, username: &str, passwordhash: &str) -> Arc<User> {
        let origin = Origin::new("test", "seed", "127.0.0.1");
        let dates = HistoryDates::new(
            Timestamp {
                sec: 1_400_000_000,
                usec: 0,
            },
            &origin,
        );
        store.users.link(User {
            userid,
            username: username.to_string(),
            emailaddress: format!("{username}@example.com"),
            joineddate: dates.createdate,
            passwordhash: passwordhash.to_string(),
            secondaryuserid: secondary_user_id(username, &format!("{username}@example.com")),
            dates,
        })
    }

    #[test]
    fn find_by_name_and_id() {
        let store = Store::new();
        seed_user(&store, 667, "alice", "ab".repeat(32).as_str());

        let by_name = store.users.find("alice").unwrap();
        assert_eq!(by_name.userid, 667);
        let by_id = store.users.find_by_id(667).unwrap();
        assert_eq!(by_id.username, "alice");
        assert!(store.users.find("bob").is_none());
        assert!(store.users.find_by_id(1).is_none());
    }

    #[test]
    fn expired_row_is_not_found_by_live_probe() {
        let store = Store::new();
        let user = seed_user(&store, 667, "alice", "hash");
        store.users.clear();

        let mut expired = (*user).clone();
        expired.dates.expirydate = Timestamp {
            sec: 1_500_000_000,
            usec: 0,
        };
        store.users.link(expired);
        assert!(store.users.find("alice").is_none());
        assert_eq!(store.users.len(), 1);
    }

    #[test]
    fn one_live_row_per_username() {
        let store = Store::new();
        seed_user(&store, 667, "alice", "first");
        seed_user(&store, 1400, "alice", "second");
        // Same business key while live: the index holds one row.
        assert_eq!(store.users.len(), 1);
        assert_eq!(store.users.find("alice").unwrap().passwordhash, "second");
    }

    #[test]
    fn clear_empties_both_indexes() {
        let store = Store::new();
        seed_user(&store, 667, "alice", "hash");
        store.users.clear();
        assert!(store.users.is_empty());
        assert!(store.users.find_by_id(667).is_none());
    }
}
