//! Microsecond timestamps, expiry sentinels, and the database text formats.
//!
//! Every persistent row carries timestamps with second + microsecond
//! resolution. Live rows are marked with the [`DEFAULT_EXPIRY`] sentinel;
//! any value parsed from the database that lands beyond
//! [`COMPARE_EXPIRY_SEC`] is coerced back to the sentinel, which absorbs
//! timezone drift in stored sentinel values.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

/// Expiry sentinel for a live row: 6-Jun-6666 06:06:06+00.
pub const DEFAULT_EXPIRY: Timestamp = Timestamp {
    sec: 148_204_965_966,
    usec: 0,
};

/// Clamp threshold: 1-Jun-6666 00:00:00+00. Anything later than this is
/// treated as the expiry sentinel.
pub const COMPARE_EXPIRY_SEC: i64 = 148_204_512_000;

/// Upper probe sentinel for "not yet known": 31-Dec-9999 23:59:59+00.
pub const DATE_EOT: Timestamp = Timestamp {
    sec: 253_402_300_799,
    usec: 0,
};

/// A wall-clock instant with microsecond resolution.
///
/// Ordering is lexicographic on `(sec, usec)`, which the derive provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub sec: i64,
    /// Microseconds within the second, `0..1_000_000`.
    pub usec: i64,
}

/// Error parsing a timestamp from its database text form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unhandled date '{0}'")]
pub struct StampError(pub String);

impl Timestamp {
    /// The Unix epoch.
    pub const ZERO: Self = Self { sec: 0, usec: 0 };

    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let dur = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: i64::try_from(dur.as_secs()).unwrap_or(i64::MAX),
            usec: i64::from(dur.subsec_micros()),
        }
    }

    /// Coerce sentinel-adjacent values onto the sentinel itself.
    ///
    /// Applied to every timestamp decoded from the database.
    #[must_use]
    pub fn clamp_expiry(self) -> Self {
        if self.sec > COMPARE_EXPIRY_SEC {
            DEFAULT_EXPIRY
        } else {
            self
        }
    }

    /// Whether this is the live-row expiry sentinel.
    #[must_use]
    pub fn is_default_expiry(self) -> bool {
        self == DEFAULT_EXPIRY
    }

    /// Difference `self - other` in seconds, with fractional microseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn diff_secs(self, other: Self) -> f64 {
        (self.sec - other.sec) as f64 + (self.usec - other.usec) as f64 / 1e6
    }

    /// Parse the database text forms `YYYY-MM-DD HH:MM:SS+TZ` and
    /// `YYYY-MM-DD HH:MM:SS.uuuuuu+TZ`.
    ///
    /// The numeric zone suffix is accepted but ignored and the broken-down
    /// time is interpreted in local time, matching how the daemon has
    /// always read these columns. The result is clamped via
    /// [`Timestamp::clamp_expiry`].
    ///
    /// # Errors
    ///
    /// Returns [`StampError`] when the text matches neither form.
    pub fn parse_text(text: &str) -> Result<Self, StampError> {
        let err = || StampError(text.to_string());
        let (body, _zone) = text.rsplit_once('+').ok_or_else(err)?;
        let (datetime, usec) = match body.split_once('.') {
            Some((head, frac)) => {
                let usec = frac.parse::<i64>().map_err(|_| err())?;
                (head, usec)
            }
            None => (body, 0),
        };
        let naive = NaiveDateTime::parse_from_str(datetime, "%Y-%m-%d %H:%M:%S")
            .map_err(|_| err())?;
        let local = Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(err)?;
        Ok(Self {
            sec: local.timestamp(),
            usec,
        }
        .clamp_expiry())
    }

    /// Parse the `sec[,usec]` epoch form used by the date-control transfer
    /// override. Returns `None` when no leading integer is present.
    #[must_use]
    pub fn parse_epoch_pair(text: &str) -> Option<Self> {
        let (head, tail) = match text.split_once(',') {
            Some((h, t)) => (h, Some(t)),
            None => (text, None),
        };
        let sec = leading_i64(head)?;
        let usec = tail.and_then(leading_i64).unwrap_or(0);
        Some(Self { sec, usec })
    }

    /// Render as `YYYY-MM-DD HH:MM:SS.uuuuuu` in local time, no zone
    /// suffix (the database columns carry a zone default).
    #[must_use]
    pub fn to_text(self) -> String {
        let nsec = u32::try_from(self.usec.clamp(0, 999_999) * 1000).unwrap_or(0);
        match Local.timestamp_opt(self.sec, nsec).single() {
            Some(dt) => format!("{}.{:06}", dt.format("%Y-%m-%d %H:%M:%S"), self.usec),
            None => format!("{}.{:06}", self.sec, self.usec),
        }
    }

    /// Convert to a UTC datetime for driver binding.
    #[must_use]
    pub fn to_utc(self) -> DateTime<Utc> {
        let nsec = u32::try_from(self.usec.clamp(0, 999_999) * 1000).unwrap_or(0);
        Utc.timestamp_opt(self.sec, nsec)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Convert from a driver-decoded UTC datetime, applying the expiry
    /// clamp.
    #[must_use]
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self {
            sec: dt.timestamp(),
            usec: i64::from(dt.timestamp_subsec_micros()),
        }
        .clamp_expiry()
    }
}

/// Read an optionally-signed decimal prefix, `sscanf("%ld")` style.
fn leading_i64(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .as_bytes()
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if end == 0 {
        return None;
    }
    let mut value: i64 = 0;
    for b in &digits.as_bytes()[..end] {
        value = value
            .saturating_mul(10)
            .saturating_add(i64::from(b - b'0'));
    }
    Some(if negative { -value } else { value })
}
