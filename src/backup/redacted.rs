//! Secrets that must never end up in logs, mails or re-serialized config.
//!
//! `RedactedString` holds encryption passphrases and SMTP passwords. The value
//! is only reachable through [`RedactedString::expose`], prints as a
//! placeholder and is zeroed on drop.

use derive_more::From;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use validator::ValidationError;
use zeroize::Zeroize;

pub static REDACTED_PLACEHOLDER: &str = "###REDACTED###";

static MIN_PASSPHRASE_LEN: usize = 8;

#[derive(Clone, Zeroize, From, PartialEq, Eq)]
pub struct RedactedString {
    inner: String,
}

impl RedactedString {
    pub fn new<S: Into<String>>(inner: S) -> Self {
        Self {
            inner: inner.into(),
        }
    }

    pub fn expose(&self) -> &str {
        self.inner.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for RedactedString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED_PLACEHOLDER)
    }
}

impl Serialize for RedactedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED_PLACEHOLDER)
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
        Ok(RedactedString::new(v))
    }
}

/// Passphrases feed key derivation, refuse trivially short ones. A newline
/// would also cut a passphrase short when it is piped to gpg.
pub fn validate_passphrase(passphrase: &RedactedString) -> result::Result<(), ValidationError> {
    if passphrase.expose().chars().count() < MIN_PASSPHRASE_LEN {
        return Err(ValidationError::new("InvalidPassphrase").with_message(
            format!("passphrase must have at least {MIN_PASSPHRASE_LEN} characters").into(),
        ));
    }
    if passphrase.expose().contains(['\n', '\r']) {
        return Err(ValidationError::new("InvalidPassphrase")
            .with_message("passphrase must be a single line".into()));
    }

    Ok(())
}
