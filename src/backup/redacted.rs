//! Secret string handling with redacted display and serialization.
//!
//! `RedactedString` carries the encryption passphrase and the database
//! credential through the run without ever exposing them in logs, debug
//! output or re-serialized configuration.

use bon::Builder;
use derive_more::From;
use getset::Getters;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use zeroize::Zeroize;

/// Placeholder shown instead of the actual secret
pub static REDACTED_SECRET: &str = "###REDACTED###";

/// A string that gets redacted in debug output and serialization.
///
/// Memory is zeroed on drop.
#[derive(Clone, Zeroize, From, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RedactedString {
    #[builder(into)]
    inner: String,
}

impl RedactedString {
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for RedactedString {
    fn from(value: &str) -> Self {
        RedactedString::builder().inner(value).build()
    }
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED_SECRET)
    }
}

impl Serialize for RedactedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED_SECRET)
    }
}

impl<'de> Deserialize<'de> for RedactedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(RedactedStringVisitor)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}

struct RedactedStringVisitor;

impl Visitor<'_> for RedactedStringVisitor {
    type Value = RedactedString;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(RedactedString::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_string_debug() {
        let redacted = RedactedString::from("secret_password");
        assert_eq!(format!("{:?}", redacted), REDACTED_SECRET);
    }

    #[test]
    fn test_redacted_string_serialize() {
        let redacted = RedactedString::from("secret_password");
        let serialized = serde_json::to_string(&redacted).unwrap();
        assert_eq!(serialized, format!("\"{}\"", REDACTED_SECRET));
    }

    #[test]
    fn test_redacted_string_deserialize() {
        let redacted: RedactedString = serde_json::from_str("\"actual_password_123\"").unwrap();
        assert_eq!(redacted.inner(), "actual_password_123");
        assert_eq!(redacted.len(), 19);
    }

    #[test]
    fn test_redacted_string_zeroize() {
        let mut redacted = RedactedString::from("secret_password");
        redacted.zeroize();
        assert!(redacted.is_empty());
    }
}
