//! PostgreSQL gateway.
//!
//! A thin typed layer over the driver: session setup, the idcontrol
//! sequence allocator, and the history-preserving update transaction.
//! The database is the source of truth; per-request failures are logged
//! and surfaced as [`DbError`], never fatal.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, error};

use ckdb_core::{Timestamp, DEFAULT_EXPIRY};

use crate::config::DbConfig;
use crate::storage::Origin;

/// Database-layer failure.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// `next_id` found no counter row for the requested name.
    #[error("no idcontrol row for '{0}'")]
    UnknownIdName(String),
}

/// Open a connection pool to the configured database.
///
/// The bootstrap path treats failure here as fatal; request paths never
/// call this.
///
/// # Errors
///
/// Returns [`DbError`] when the session cannot be established.
pub async fn connect(cfg: &DbConfig) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&cfg.url())
        .await?;
    debug!(host = %cfg.host, dbname = %cfg.dbname, "database session established");
    Ok(pool)
}

/// Allocate the next value of a named idcontrol sequence.
///
/// Runs `SELECT ... FOR UPDATE` then the increment update inside one
/// transaction, so concurrent callers always see distinct values.
/// `userid` uses a random increment for the privacy gap; everything else
/// increments by one.
///
/// # Errors
///
/// Returns [`DbError::UnknownIdName`] when no counter row exists, or the
/// driver error otherwise. The caller must treat the row it was building
/// as failed.
pub async fn next_id(
    pool: &PgPool,
    idname: &str,
    increment: i64,
    now: Timestamp,
    origin: &Origin,
) -> Result<i64, DbError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query("select lastid from idcontrol where idname = $1 for update")
        .bind(idname)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(row) = row else {
        error!("next_id(): no matching idname='{idname}'");
        return Err(DbError::UnknownIdName(idname.to_string()));
    };
    let lastid: i64 = row.try_get("lastid")?;
    let allocated = lastid + increment;

    sqlx::query(
        "update idcontrol set lastid = $1, modifydate = $2, modifyby = $3, \
         modifycode = $4, modifyinet = $5 where idname = $6",
    )
    .bind(allocated)
    .bind(now.to_utc())
    .bind(&origin.by)
    .bind(&origin.code)
    .bind(&origin.inet)
    .bind(idname)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(allocated)
}

/// Expire the live row matched by `where_sql` as the first step of a
/// history-preserving update.
///
/// Meant to run inside the caller's transaction: the pattern is expire,
/// insert the replacement row, commit. `where_sql` must reference `$2`
/// for its key parameter; `$1`/`$3` are bound to `now` and the expiry
/// sentinel here.
///
/// # Errors
///
/// Propagates the driver error; the caller's transaction rolls back on
/// drop.
pub async fn expire_live_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    table: &str,
    where_sql: &str,
    key: i64,
    now: Timestamp,
) -> Result<(), DbError> {
    let sql = format!("update {table} set expirydate = $1 where {where_sql} and expirydate = $3");
    sqlx::query(&sql)
        .bind(now.to_utc())
        .bind(key)
        .bind(DEFAULT_EXPIRY.to_utc())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_driver_and_idname() {
        let err = DbError::UnknownIdName("userid".to_string());
        assert_eq!(err.to_string(), "no idcontrol row for 'userid'");
    }
}
