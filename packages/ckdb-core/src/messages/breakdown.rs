//! The `breakdown` request parser.
//!
//! One message on the wire is `id.cmd[.data]`. The data segment is either
//! dot-framed (`name=value` fields separated by the 0x02 byte) or a JSON
//! object introduced by the literal `json=`. Both encodings land in a
//! [`Transfer`] with first-wins duplicate resolution.

use tracing::info;

use super::{lookup, Command, FLDSEP, ID_SIZE};
use crate::transfer::Transfer;

const JSON_PREFIX: &str = "json=";

/// A parsed request ready for dispatch.
#[derive(Debug)]
pub struct Request {
    /// Caller-supplied message id, truncated to [`ID_SIZE`] bytes.
    pub id: String,
    pub command: Command,
    pub transfer: Transfer,
}

/// The message could not be turned into a [`Request`].
///
/// Every variant still carries the (truncated) id so the listener can
/// send the `id.<now>.?` reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Not even `id.cmd` shaped.
    #[error("invalid message")]
    Invalid { id: String },
    /// The verb is not in the command table.
    #[error("unknown command '{verb}'")]
    UnknownCommand { id: String, verb: String },
    /// `json=` data that does not decode.
    #[error("json decode error")]
    Json { id: String },
}

impl ParseError {
    /// The id to echo in the failure reply.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Invalid { id } | Self::UnknownCommand { id, .. } | Self::Json { id } => id,
        }
    }
}

/// Truncate an id to [`ID_SIZE`] bytes on a char boundary.
fn clip_id(raw: &str) -> String {
    if raw.len() <= ID_SIZE {
        return raw.to_string();
    }
    let mut end = ID_SIZE;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

/// Parse one raw message into a [`Request`].
///
/// # Errors
///
/// Returns [`ParseError`] for messages without a verb segment, unknown
/// verbs, and undecodable JSON data. All of these are answered with the
/// `id.<now>.?` reply by the listener.
pub fn breakdown(raw: &str) -> Result<Request, ParseError> {
    let Some((id, rest)) = raw.split_once('.') else {
        info!("listener received invalid message: '{raw}'");
        return Err(ParseError::Invalid { id: clip_id(raw) });
    };
    let id = clip_id(id);

    let (verb, data) = match rest.split_once('.') {
        Some((verb, data)) => (verb, Some(data)),
        None => (rest, None),
    };

    let Some(def) = lookup(verb) else {
        info!("listener received unknown command: '{raw}'");
        return Err(ParseError::UnknownCommand {
            id,
            verb: verb.to_string(),
        });
    };

    let transfer = match data {
        None => Transfer::new(),
        Some(data) => match data.strip_prefix(JSON_PREFIX) {
            Some(json) => parse_json(json).ok_or_else(|| {
                info!("json decode error from command: '{verb}'");
                ParseError::Json { id: id.clone() }
            })?,
            None => parse_dot_frame(data),
        },
    };

    Ok(Request {
        id,
        command: def.command,
        transfer,
    })
}

/// Dot-frame data: `name=value` fields separated by [`FLDSEP`]; a field
/// without `=` keeps an empty value.
fn parse_dot_frame(data: &str) -> Transfer {
    let mut transfer = Transfer::new();
    for field in data.split(FLDSEP as char) {
        if field.is_empty() {
            continue;
        }
        let (name, value) = match field.split_once('=') {
            Some((name, value)) => (name, value),
            None => (field, ""),
        };
        transfer.insert(name, value.to_string());
    }
    transfer
}

/// JSON data: object keys become field names. Strings pass through,
/// numbers render as decimal text, arrays of strings join with spaces
/// (the merkle branch list). Any other value type is ignored.
fn parse_json(json: &str) -> Option<Transfer> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    let mut transfer = Transfer::new();
    let Some(object) = value.as_object() else {
        // A decodable non-object carries no fields.
        return Some(transfer);
    };
    for (key, value) in object {
        match value {
            serde_json::Value::String(s) => {
                transfer.insert(key, s.clone());
            }
            serde_json::Value::Number(n) => {
                let text = if let Some(i) = n.as_i64() {
                    crate::codec::i64_to_text(i)
                } else if let Some(u) = n.as_u64() {
                    u.to_string()
                } else {
                    crate::codec::f64_to_text(n.as_f64().unwrap_or(0.0))
                };
                transfer.insert(key, text);
            }
            serde_json::Value::Array(items) => {
                let joined = items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                transfer.insert(key, joined);
            }
            _ => {}
        }
    }
    Some(transfer)
}
