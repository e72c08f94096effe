//! Date-control bundles carried by every persistent row.
//!
//! Three shapes exist: History (create + expiry, for expiring rows),
//! Modify (create + modify, for `idcontrol` only), and Simple (create
//! only, for append-only rows).

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;

use ckdb_core::{Timestamp, Transfer, DEFAULT_EXPIRY};

/// Identity of the writer recorded on every row.
#[derive(Debug, Clone)]
pub struct Origin {
    pub by: String,
    pub code: String,
    pub inet: String,
}

impl Origin {
    #[must_use]
    pub fn new(by: &str, code: &str, inet: &str) -> Self {
        Self {
            by: by.to_string(),
            code: code.to_string(),
            inet: inet.to_string(),
        }
    }
}

/// Create-only, expiring date control.
///
/// A live row carries `expirydate == DEFAULT_EXPIRY`; an obsolete
/// version carries the instant it was superseded.
#[derive(Debug, Clone)]
pub struct HistoryDates {
    pub createdate: Timestamp,
    pub createby: String,
    pub createcode: String,
    pub createinet: String,
    pub expirydate: Timestamp,
}

impl HistoryDates {
    /// Fresh live-row dates.
    #[must_use]
    pub fn new(now: Timestamp, origin: &Origin) -> Self {
        Self {
            createdate: now,
            createby: origin.by.clone(),
            createcode: origin.code.clone(),
            createinet: origin.inet.clone(),
            expirydate: DEFAULT_EXPIRY,
        }
    }

    /// Override the create fields from optional transfer entries: the
    /// pool stamps its own `createdate` (epoch `sec[,usec]` form),
    /// `createby`, `createcode` and `createinet` on ingest messages.
    pub fn apply_transfer(&mut self, transfer: &Transfer) {
        apply_create_overrides(
            transfer,
            &mut self.createdate,
            &mut self.createby,
            &mut self.createcode,
            &mut self.createinet,
        );
    }

    /// Decode from the trailing history columns of a result row.
    ///
    /// # Errors
    ///
    /// Propagates the driver decode error.
    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            createdate: get_stamp(row, "createdate")?,
            createby: row.try_get("createby")?,
            createcode: row.try_get("createcode")?,
            createinet: row.try_get("createinet")?,
            expirydate: get_stamp(row, "expirydate")?,
        })
    }
}

/// Mutable date control used only by `idcontrol`.
#[derive(Debug, Clone)]
pub struct ModifyDates {
    pub createdate: Timestamp,
    pub createby: String,
    pub createcode: String,
    pub createinet: String,
    pub modifydate: Timestamp,
    pub modifyby: String,
    pub modifycode: String,
    pub modifyinet: String,
}

impl ModifyDates {
    /// Fresh dates: modify fields start empty.
    #[must_use]
    pub fn new(now: Timestamp, origin: &Origin) -> Self {
        Self {
            createdate: now,
            createby: origin.by.clone(),
            createcode: origin.code.clone(),
            createinet: origin.inet.clone(),
            modifydate: Timestamp::ZERO,
            modifyby: String::new(),
            modifycode: String::new(),
            modifyinet: String::new(),
        }
    }
}

/// Create-only date control for append-only rows.
#[derive(Debug, Clone)]
pub struct SimpleDates {
    pub createdate: Timestamp,
    pub createby: String,
    pub createcode: String,
    pub createinet: String,
}

impl SimpleDates {
    #[must_use]
    pub fn new(now: Timestamp, origin: &Origin) -> Self {
        Self {
            createdate: now,
            createby: origin.by.clone(),
            createcode: origin.code.clone(),
            createinet: origin.inet.clone(),
        }
    }

    /// Same overrides as [`HistoryDates::apply_transfer`].
    pub fn apply_transfer(&mut self, transfer: &Transfer) {
        apply_create_overrides(
            transfer,
            &mut self.createdate,
            &mut self.createby,
            &mut self.createcode,
            &mut self.createinet,
        );
    }

    /// Decode from the trailing simple-date columns of a result row.
    ///
    /// # Errors
    ///
    /// Propagates the driver decode error.
    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            createdate: get_stamp(row, "createdate")?,
            createby: row.try_get("createby")?,
            createcode: row.try_get("createcode")?,
            createinet: row.try_get("createinet")?,
        })
    }
}

/// Decode a timestamp column, applying the expiry clamp.
pub fn get_stamp(row: &PgRow, column: &str) -> Result<Timestamp, sqlx::Error> {
    let dt: DateTime<Utc> = row.try_get(column)?;
    Ok(Timestamp::from_utc(dt))
}

fn apply_create_overrides(
    transfer: &Transfer,
    createdate: &mut Timestamp,
    createby: &mut String,
    createcode: &mut String,
    createinet: &mut String,
) {
    if let Some(value) = transfer.optional("createdate", 10, None) {
        if let Some(stamp) = Timestamp::parse_epoch_pair(value) {
            *createdate = stamp;
        }
    }
    if let Some(value) = transfer.optional("createby", 1, None) {
        *createby = value.to_string();
    }
    if let Some(value) = transfer.optional("createcode", 1, None) {
        *createcode = value.to_string();
    }
    if let Some(value) = transfer.optional("createinet", 1, None) {
        *createinet = value.to_string();
    }
}
