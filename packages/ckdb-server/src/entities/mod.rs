//! Per-entity tables: row types, in-memory indexes, and the database
//! load/insert/update shapes.
//!
//! Every database-backed entity exposes `add` (build a row, allocate its
//! id, insert, link into the indexes on success), `fill` (load live rows
//! at bootstrap) and `reload` (purge and refill). `shares` and
//! `shareerrors` live in memory only and are never written to the
//! database.

pub mod auths;
pub mod idcontrol;
pub mod payments;
pub mod poolstats;
pub mod shareerrors;
pub mod shares;
pub mod users;
pub mod workers;
pub mod workinfo;

use sqlx::PgPool;

pub use auths::Auth;
pub use payments::Payment;
pub use poolstats::Poolstat;
pub use shareerrors::ShareError;
pub use shares::Share;
pub use users::{User, UsersTable};
pub use workers::Worker;
pub use workinfo::Workinfo;

use crate::db::DbError;
use crate::storage::TemporalTable;

/// Failure while mutating or loading an entity.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    /// The named user has no live row.
    #[error("unknown user '{0}'")]
    UnknownUser(String),
    /// A share referenced a workinfo that was never seen.
    #[error("no workinfo {0}")]
    MissingWorkinfo(i64),
    /// A share referenced a worker that was never authorised.
    #[error("no worker {userid}/{workername}")]
    MissingWorker { userid: i64, workername: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(DbError::Sqlx(err))
    }
}

/// The live in-memory mirror of the working set.
///
/// One table per entity, each behind its own lock. Operations take one
/// table lock at a time and never nest them; cross-table work (the
/// share integrity checks, the payments scan) runs on the `Arc` row
/// handles a lookup returned.
#[derive(Debug, Default)]
pub struct Store {
    pub users: UsersTable,
    pub workers: TemporalTable<Worker>,
    pub payments: TemporalTable<Payment>,
    pub workinfo: TemporalTable<Workinfo>,
    pub shares: TemporalTable<Share>,
    pub shareerrors: TemporalTable<ShareError>,
    pub auths: TemporalTable<Auth>,
    pub poolstats: TemporalTable<Poolstat>,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate every table from the database at bootstrap.
    ///
    /// # Errors
    ///
    /// Returns the first entity load failure.
    pub async fn fill_all(&self, pool: &PgPool) -> Result<(), StoreError> {
        users::fill(pool, self).await?;
        workers::fill(pool, self).await?;
        payments::fill(pool, self).await?;
        workinfo::fill(pool, self).await?;
        shares::fill(self);
        shareerrors::fill(self);
        auths::fill(pool, self).await?;
        poolstats::fill(pool, self).await?;
        Ok(())
    }
}
