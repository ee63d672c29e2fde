//! Redacting wrapper for tokens, passwords and key material.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer};
use std::fmt::{self, Debug, Display, Formatter};

/// A string whose contents never appear in `Debug` or `Display` output.
///
/// Access tokens, refresh secrets, client secrets and encryption keys are all
/// carried as `SecretString` so that logging a struct that holds one cannot
/// leak it. Call [`expose`](SecretString::expose) at the point of use.
///
/// ```rust
/// use warden_core::SecretString;
///
/// let secret = SecretString::new("rt-123");
/// assert_eq!(format!("{:?}", secret), "[REDACTED]");
/// assert_eq!(secret.expose(), "rt-123");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// The underlying value. Do not log it.
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Consume the wrapper and return the value.
    pub fn into_inner(self) -> String {
        self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl Debug for SecretString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Display for SecretString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// A 256-bit symmetric key for sealing stored refresh secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Decode a standard base64 key. It must decode to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("not valid base64: {}", e))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("expected {} bytes, got {}", Self::LEN, b.len()))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Debug for EncryptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encryption_key_length_checked() {
        let good = STANDARD.encode([7u8; 32]);
        let key = EncryptionKey::from_base64(&good).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; 32]);
        assert_eq!(format!("{:?}", key), "EncryptionKey([REDACTED])");

        let short = STANDARD.encode([7u8; 16]);
        let err = EncryptionKey::from_base64(&short).unwrap_err();
        assert!(err.contains("expected 32 bytes, got 16"));

        assert!(EncryptionKey::from_base64("not base64!!").is_err());
    }

    #[test]
    fn test_redacted_in_debug_and_display() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_redacted_inside_struct() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct Holder {
            name: &'static str,
            token: SecretString,
        }

        let holder = Holder {
            name: "alice",
            token: SecretString::new("abc.def.ghi"),
        };
        let out = format!("{:?}", holder);
        assert!(out.contains("alice"));
        assert!(!out.contains("abc.def.ghi"));
    }
}
