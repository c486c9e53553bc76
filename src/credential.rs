//! The shared credential value.
//!
//! A [`Credential`] is an opaque token shared by every replica. It never shows
//! up in logs, debug output or serialized payloads by accident: the raw value
//! is only reachable through [`Credential::expose`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// An opaque credential whose memory is cleared on drop.
///
/// - `Debug` prints `Credential([REDACTED])`
/// - `Display` and `Serialize` print `[REDACTED]`
/// - the empty string is a valid credential
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Builds a credential from raw file contents, replacing invalid UTF-8
    /// sequences rather than rejecting the read.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Exposes the underlying value. Never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Credential {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Credential)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential([REDACTED])")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Credential {}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacts_debug_and_display() {
        let credential = Credential::new("fake-token-1700000000000");
        assert_eq!(format!("{:?}", credential), "Credential([REDACTED])");
        assert_eq!(format!("{}", credential), "[REDACTED]");
    }

    #[test]
    fn test_credential_serialization_redacts() {
        let credential = Credential::new("abc");
        let json = serde_json::to_string(&credential).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");

        let parsed: Credential = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(parsed.expose(), "abc");
    }

    #[test]
    fn test_credential_from_bytes_is_lossy() {
        let credential = Credential::from_bytes(b"abc\n");
        assert_eq!(credential.expose(), "abc\n");

        let invalid = Credential::from_bytes(&[0x61, 0xff, 0x62]);
        assert_eq!(invalid.expose(), "a\u{fffd}b");
    }

    #[test]
    fn test_empty_credential_is_allowed() {
        let credential = Credential::from_bytes(b"");
        assert!(credential.is_empty());
        assert_eq!(credential, Credential::new(""));
    }
}
