//! Bernstein hash used to fingerprint users.
//!
//! `secondaryuserid` is a short stable identity token handed back to the
//! pool process. It is derived from the username and email address so the
//! pool never needs to see the numeric `userid`.

/// 64-bit Bernstein hash: `h = h * 33 + byte`, starting from zero.
#[must_use]
pub fn bernstein(data: &[u8]) -> u64 {
    data.iter()
        .fold(0u64, |h, &b| h.wrapping_mul(33).wrapping_add(u64::from(b)))
}

/// Derive the 16-hex-char `secondaryuserid` for a user.
///
/// Hashes the literal `"{username}&#{emailaddress}"` and renders the hash
/// bytes least-significant first as lowercase hex.
#[must_use]
pub fn secondary_user_id(username: &str, emailaddress: &str) -> String {
    let hash = bernstein(format!("{username}&#{emailaddress}").as_bytes());
    let mut out = String::with_capacity(16);
    for byte in hash.to_le_bytes() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bernstein_matches_hand_computation() {
        // h("ab") = (0*33 + 'a')*33 + 'b' = 97*33 + 98 = 3299
        assert_eq!(bernstein(b"ab"), 3299);
        assert_eq!(bernstein(b""), 0);
    }

    #[test]
    fn secondary_user_id_is_deterministic() {
        let a = secondary_user_id("alice", "alice@example.com");
        let b = secondary_user_id("alice", "alice@example.com");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert!(!a.bytes().any(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn secondary_user_id_depends_on_both_inputs() {
        let base = secondary_user_id("alice", "alice@example.com");
        assert_ne!(base, secondary_user_id("bob", "alice@example.com"));
        assert_ne!(base, secondary_user_id("alice", "bob@example.com"));
    }

    #[test]
    fn separator_prevents_ambiguity() {
        // The "&#" separator keeps (user, email) pairs from colliding by
        // concatenation alone.
        assert_ne!(
            secondary_user_id("ab", "c@x.co"),
            secondary_user_id("a", "bc@x.co")
        );
    }
}
