//! Per-request transfer map: named string fields with validation.
//!
//! The request parser fills one [`Transfer`] per message. Handlers pull
//! fields out with [`Transfer::require`] (failing with the exact reply
//! string the protocol expects) or [`Transfer::optional`] (silent).

use std::collections::BTreeMap;

use regex::Regex;

/// Validation patterns shared by the handlers.
pub mod patterns {
    /// Usernames: any printable ASCII, no spaces.
    pub const USER: &str = "^[!-~]*$";
    /// Email addresses.
    pub const MAIL: &str =
        r"^[A-Za-z0-9_-][A-Za-z0-9_\.-]*@[A-Za-z0-9][A-Za-z0-9\.]*[A-Za-z0-9]$";
    /// Identifier names (idcontrol sequence names).
    pub const ID: &str = "^[_A-Za-z][_A-Za-z0-9]*$";
    /// Positive integers.
    pub const INT: &str = "^[0-9][0-9]*$";
    /// Hex strings (password hashes).
    pub const HEX: &str = "^[A-Fa-f0-9]*$";
}

/// A required field failed validation.
///
/// The `Display` form is the literal reply payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// No field with this name was present.
    #[error("failed.missing {0}")]
    Missing(String),
    /// The value was empty or below the minimum length.
    #[error("failed.short {0}")]
    Short(String),
    /// The validation pattern itself failed to compile.
    #[error("failed.REC {0}")]
    Pattern(String),
    /// The value did not match the validation pattern.
    #[error("failed.invalid {0}")]
    Invalid(String),
}

/// Per-request bag of named string values.
///
/// Exactly one entry exists per unique name: duplicates resolve
/// first-wins, so a repeated field in one message cannot override the
/// value already seen.
#[derive(Debug, Default)]
pub struct Transfer {
    fields: BTreeMap<String, String>,
}

impl Transfer {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field. Returns `false` (and keeps the existing value)
    /// when the name was already present.
    pub fn insert(&mut self, name: &str, value: String) -> bool {
        if self.fields.contains_key(name) {
            return false;
        }
        self.fields.insert(name.to_string(), value);
        true
    }

    /// Raw lookup without validation.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Number of distinct fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the map holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a required field, validating length and pattern.
    ///
    /// # Errors
    ///
    /// Returns the [`FieldError`] whose `Display` form is the reply to
    /// send: `failed.missing N`, `failed.short N` (empty counts as
    /// short), `failed.REC N`, or `failed.invalid N`.
    pub fn require(
        &self,
        name: &str,
        min_len: usize,
        pattern: Option<&str>,
    ) -> Result<&str, FieldError> {
        let value = self
            .get(name)
            .ok_or_else(|| FieldError::Missing(name.to_string()))?;
        if value.is_empty() || value.len() < min_len {
            return Err(FieldError::Short(name.to_string()));
        }
        if let Some(patt) = pattern {
            let re = Regex::new(patt).map_err(|_| FieldError::Pattern(name.to_string()))?;
            if !re.is_match(value) {
                return Err(FieldError::Invalid(name.to_string()));
            }
        }
        Ok(value)
    }

    /// Look up an optional field with the same validation, silently
    /// yielding `None` on any failure.
    #[must_use]
    pub fn optional(&self, name: &str, min_len: usize, pattern: Option<&str>) -> Option<&str> {
        self.require(name, min_len, pattern).ok()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn filled() -> Transfer {
        let mut t = Transfer::new();
        t.insert("username", "alice".to_string());
        t.insert("emailaddress", "alice@example.com".to_string());
        t.insert("empty", String::new());
        t
    }

    #[test]
    fn insert_is_first_wins() {
        let mut t = Transfer::new();
        assert!(t.insert("name", "first".to_string()));
        assert!(!t.insert("name", "second".to_string()));
        assert_eq!(t.get("name"), Some("first"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn require_missing() {
        let t = filled();
        assert_eq!(
            t.require("nothere", 1, None),
            Err(FieldError::Missing("nothere".to_string()))
        );
    }

    #[test]
    fn require_short() {
        let t = filled();
        assert_eq!(
            t.require("username", 10, None),
            Err(FieldError::Short("username".to_string()))
        );
        // Empty values are short even with a zero minimum.
        assert_eq!(
            t.require("empty", 0, None),
            Err(FieldError::Short("empty".to_string()))
        );
    }

    #[test]
    fn require_pattern_mismatch() {
        let mut t = Transfer::new();
        t.insert("username", "has space".to_string());
        assert_eq!(
            t.require("username", 3, Some(patterns::USER)),
            Err(FieldError::Invalid("username".to_string()))
        );
    }

    #[test]
    fn require_bad_pattern_is_rec() {
        let t = filled();
        assert_eq!(
            t.require("username", 1, Some("([")),
            Err(FieldError::Pattern("username".to_string()))
        );
    }

    #[test]
    fn require_success() {
        let t = filled();
        assert_eq!(
            t.require("username", 3, Some(patterns::USER)).unwrap(),
            "alice"
        );
        assert_eq!(
            t.require("emailaddress", 7, Some(patterns::MAIL)).unwrap(),
            "alice@example.com"
        );
    }

    #[test]
    fn optional_is_silent() {
        let t = filled();
        assert_eq!(t.optional("username", 3, None), Some("alice"));
        assert_eq!(t.optional("nothere", 1, None), None);
        assert_eq!(t.optional("username", 64, None), None);
    }

    #[test]
    fn error_display_matches_protocol() {
        assert_eq!(
            FieldError::Missing("x".to_string()).to_string(),
            "failed.missing x"
        );
        assert_eq!(
            FieldError::Short("x".to_string()).to_string(),
            "failed.short x"
        );
        assert_eq!(
            FieldError::Pattern("x".to_string()).to_string(),
            "failed.REC x"
        );
        assert_eq!(
            FieldError::Invalid("x".to_string()).to_string(),
            "failed.invalid x"
        );
    }

    #[test]
    fn mail_pattern_examples() {
        let mut t = Transfer::new();
        t.insert("good", "a_b-c.d@mail.example.org".to_string());
        t.insert("nodomain", "alice@".to_string());
        t.insert("noat", "alice.example.com".to_string());
        assert!(t.require("good", 1, Some(patterns::MAIL)).is_ok());
        assert!(t.require("nodomain", 1, Some(patterns::MAIL)).is_err());
        assert!(t.require("noat", 1, Some(patterns::MAIL)).is_err());
    }

    #[test]
    fn int_and_hex_patterns() {
        let mut t = Transfer::new();
        t.insert("n", "0123".to_string());
        t.insert("neg", "-1".to_string());
        t.insert("hash", "DeadBeef00".to_string());
        t.insert("nothex", "xyz".to_string());
        assert!(t.require("n", 1, Some(patterns::INT)).is_ok());
        assert!(t.require("neg", 1, Some(patterns::INT)).is_err());
        assert!(t.require("hash", 1, Some(patterns::HEX)).is_ok());
        assert!(t.require("nothex", 1, Some(patterns::HEX)).is_err());
    }

    proptest! {
        /// Whatever order duplicates arrive in, only the first survives.
        #[test]
        fn first_wins_under_arbitrary_inserts(
            values in proptest::collection::vec("[a-z]{1,8}", 1..10)
        ) {
            let mut t = Transfer::new();
            for v in &values {
                t.insert("field", v.clone());
            }
            prop_assert_eq!(t.get("field"), Some(values[0].as_str()));
            prop_assert_eq!(t.len(), 1);
        }
    }
}
