//! Encryption key material for `SQLCipher` databases.

use std::fmt;

use secrecy::{ExposeSecret, SecretBox, SecretString};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Key used to unlock an encrypted database.
///
/// A passphrase is run through `SQLCipher`'s KDF; a raw key is used as the
/// page key directly (`x'<hex>'` form). Both variants zeroize on drop and
/// never appear in `Debug` output.
pub enum DatabaseKey {
    /// User-supplied passphrase.
    Passphrase(SecretString),
    /// 32 bytes of raw key material.
    Raw(SecretBox<[u8; 32]>),
}

impl DatabaseKey {
    /// Wraps a passphrase.
    #[must_use]
    pub fn passphrase(passphrase: impl Into<String>) -> Self {
        Self::Passphrase(SecretString::new(passphrase.into().into_boxed_str()))
    }

    /// Wraps raw 32-byte key material.
    #[must_use]
    pub fn raw(key: [u8; 32]) -> Self {
        Self::Raw(SecretBox::new(Box::new(key)))
    }

    /// Compares two keys in constant time.
    ///
    /// Keys of different variants never match, even if the passphrase would
    /// happen to derive the same page key.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Passphrase(a), Self::Passphrase(b)) => bool::from(
                a.expose_secret()
                    .as_bytes()
                    .ct_eq(b.expose_secret().as_bytes()),
            ),
            (Self::Raw(a), Self::Raw(b)) => {
                bool::from(a.expose_secret()[..].ct_eq(&b.expose_secret()[..]))
            }
            _ => false,
        }
    }

    /// Builds the `PRAGMA key` statement for this key.
    ///
    /// Passphrases are embedded as SQL string literals with quotes doubled;
    /// raw keys use the `"x'<hex>'"` blob form.
    pub(crate) fn pragma(&self) -> Zeroizing<String> {
        match self {
            Self::Passphrase(secret) => {
                let escaped = Zeroizing::new(secret.expose_secret().replace('\'', "''"));
                Zeroizing::new(format!("PRAGMA key = '{}';", escaped.as_str()))
            }
            Self::Raw(secret) => {
                let key_hex = Zeroizing::new(hex::encode(secret.expose_secret()));
                Zeroizing::new(format!("PRAGMA key = \"x'{}'\";", key_hex.as_str()))
            }
        }
    }
}

impl fmt::Debug for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passphrase(_) => f.write_str("DatabaseKey::Passphrase([REDACTED])"),
            Self::Raw(_) => f.write_str("DatabaseKey::Raw([REDACTED])"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_is_variant_and_content_sensitive() {
        let a = DatabaseKey::passphrase("password");
        assert!(a.matches(&DatabaseKey::passphrase("password")));
        assert!(!a.matches(&DatabaseKey::passphrase("bad")));
        assert!(!a.matches(&DatabaseKey::raw([0x42; 32])));
        assert!(DatabaseKey::raw([0x42; 32]).matches(&DatabaseKey::raw([0x42; 32])));
    }

    #[test]
    fn test_pragma_escapes_quotes() {
        let key = DatabaseKey::passphrase("it's");
        assert_eq!(key.pragma().as_str(), "PRAGMA key = 'it''s';");
        let raw = DatabaseKey::raw([0xAB; 32]);
        assert!(raw.pragma().starts_with("PRAGMA key = \"x'abab"));
    }

    #[test]
    fn test_debug_is_redacted() {
        let rendered = format!("{:?}", DatabaseKey::passphrase("hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
