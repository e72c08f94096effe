//! Named id counters.
//!
//! The one Modify-dated entity. Rows are database-only: the allocator in
//! [`crate::db::next_id`] works directly against the table under
//! `FOR UPDATE`, so a memory mirror would only race it.

use sqlx::PgPool;
use tracing::{debug, error};

use ckdb_core::{codec, Timestamp};

use super::StoreError;
use crate::storage::{ModifyDates, Origin};

const INSERT: &str = "insert into idcontrol \
    (idname,lastid,\
    createdate,createby,createcode,createinet,\
    modifydate,modifyby,modifycode,modifyinet) \
    values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)";

/// Create a named counter starting at `idvalue`.
///
/// Every sequence name must exist here before the allocator is asked
/// for it.
///
/// # Errors
///
/// Returns the database failure (including a duplicate idname).
pub async fn add(
    pool: &PgPool,
    idname: &str,
    idvalue: &str,
    now: Timestamp,
    origin: &Origin,
) -> Result<(), StoreError> {
    debug!("idcontrol add {idname}");

    let dates = ModifyDates::new(now, origin);
    sqlx::query(INSERT)
        .bind(idname)
        .bind(codec::parse_i64(idvalue))
        .bind(dates.createdate.to_utc())
        .bind(&dates.createby)
        .bind(&dates.createcode)
        .bind(&dates.createinet)
        .bind(dates.modifydate.to_utc())
        .bind(&dates.modifyby)
        .bind(&dates.modifycode)
        .bind(&dates.modifyinet)
        .execute(pool)
        .await
        .map_err(|err| {
            error!("idcontrol insert failed: {err}");
            err
        })?;
    Ok(())
}
