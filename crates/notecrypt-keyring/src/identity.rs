//! User identity handling and redacted log references.

use std::fmt;

use crate::error::KeyringError;

/// Number of hex characters kept from the blake3 digest in log references.
const REDACTED_REF_LEN: usize = 12;

/// A validated, non-blank user id.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    /// Validate a raw user id.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::MissingIdentity`] for an empty or
    /// whitespace-only id.
    pub fn parse(raw: &str) -> Result<Self, KeyringError> {
        if raw.trim().is_empty() {
            return Err(KeyringError::MissingIdentity);
        }
        Ok(Self(raw.to_owned()))
    }

    /// The raw id, as fed to key derivation and storage naming.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, non-reversible reference for log lines.
    #[must_use]
    pub fn redacted(&self) -> RedactedUser {
        let digest = blake3::hash(self.0.as_bytes());
        let mut hex = digest.to_hex().to_string();
        hex.truncate(REDACTED_REF_LEN);
        RedactedUser(hex)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.redacted())
    }
}

/// Display-only redacted user reference (`u:<12 hex>`).
#[derive(Clone, PartialEq, Eq)]
pub struct RedactedUser(String);

impl fmt::Display for RedactedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u:{}", self.0)
    }
}

impl fmt::Debug for RedactedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_ids_are_missing_identity() {
        assert!(matches!(UserId::parse(""), Err(KeyringError::MissingIdentity)));
        assert!(matches!(UserId::parse("  \t"), Err(KeyringError::MissingIdentity)));
    }

    #[test]
    fn redacted_ref_hides_raw_id() {
        let user = UserId::parse("alice@example.com").unwrap();
        let shown = user.redacted().to_string();
        assert!(shown.starts_with("u:"));
        assert_eq!(shown.len(), 2 + REDACTED_REF_LEN);
        assert!(!shown.contains("alice"));
        assert!(!format!("{user:?}").contains("alice"));
    }

    #[test]
    fn redacted_ref_is_stable() {
        let a = UserId::parse("user-1").unwrap().redacted();
        let b = UserId::parse("user-1").unwrap().redacted();
        let c = UserId::parse("user-2").unwrap().redacted();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
