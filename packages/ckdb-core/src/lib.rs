//! `ckdb` core -- timestamps, field codec, transfer map, and message parsing.
//!
//! This crate provides the foundation layer for the `ckdb` daemon:
//!
//! - **Stamp** ([`stamp`]): microsecond timestamps, the expiry sentinels,
//!   and the database text formats
//! - **Codec** ([`codec`]): text to typed-value conversions for the six
//!   logical field types
//! - **Hash** ([`hash`]): Bernstein fingerprint used for `secondaryuserid`
//! - **Transfer** ([`transfer`]): per-request field bag with validation
//! - **Messages** ([`messages`]): the command table and the `breakdown`
//!   request parser (dot-framed and JSON-embedded encodings)

pub mod codec;
pub mod hash;
pub mod messages;
pub mod stamp;
pub mod transfer;

// Stamp
pub use stamp::{Timestamp, COMPARE_EXPIRY_SEC, DATE_EOT, DEFAULT_EXPIRY};

// Hash
pub use hash::{bernstein, secondary_user_id};

// Transfer
pub use transfer::{patterns, FieldError, Transfer};

// Messages
pub use messages::{breakdown, Access, Command, ParseError, Request, FLDSEP, ID_SIZE};
