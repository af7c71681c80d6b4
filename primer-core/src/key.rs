//! Cache keys.
//!
//! A key doubles as a segment of the change-bus topic published when the
//! cached value changes, so it has to satisfy the bus channel-name grammar:
//!
//! - one or more `/`-separated segments, with one optional leading `/`
//! - each segment is a non-empty run of ASCII letters, digits and the marks
//!   `- _ ! ~ ( ) $ @ . :`
//!
//! Wildcards, whitespace, empty segments and a trailing `/` are rejected, as
//! is any key longer than [`MAX_KEY_LEN`] bytes.
//! A `CacheKey` can only be obtained through [`CacheKey::parse`], so every
//! key reaching storage or the attribute index has already been validated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KeyError;

/// Segment separator shared with the change bus.
pub const SEGMENT_SEPARATOR: char = '/';

/// Longest accepted key, in bytes. Keeps storage index keys within LMDB's
/// 511-byte key limit.
pub const MAX_KEY_LEN: usize = 256;

const SEGMENT_MARKS: &[char] = &['-', '_', '!', '~', '(', ')', '$', '@', '.', ':'];

/// A validated cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Validate and wrap a key.
    pub fn parse(key: impl Into<String>) -> Result<Self, KeyError> {
        let key = key.into();
        match invalid_reason(&key) {
            Some(reason) => Err(KeyError::InvalidKey {
                key,
                reason: reason.to_string(),
            }),
            None => Ok(Self(key)),
        }
    }

    /// Returns true if `key` satisfies the key grammar.
    pub fn is_valid(key: &str) -> bool {
        invalid_reason(key).is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `/`-separated segments of the key, without the leading separator.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0
            .strip_prefix(SEGMENT_SEPARATOR)
            .unwrap_or(&self.0)
            .split(SEGMENT_SEPARATOR)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || SEGMENT_MARKS.contains(&c)
}

fn invalid_reason(key: &str) -> Option<&'static str> {
    if key.is_empty() {
        return Some("key is empty");
    }
    if key.len() > MAX_KEY_LEN {
        return Some("key is longer than 256 bytes");
    }
    let body = key.strip_prefix(SEGMENT_SEPARATOR).unwrap_or(key);
    if body.is_empty() {
        return Some("key has no segments");
    }
    for segment in body.split(SEGMENT_SEPARATOR) {
        if segment.is_empty() {
            return Some("key contains an empty segment");
        }
        if segment.contains('*') {
            return Some("wildcards are not allowed in keys");
        }
        if segment.chars().any(char::is_whitespace) {
            return Some("whitespace is not allowed in keys");
        }
        if !segment.chars().all(is_segment_char) {
            return Some("key contains a character outside the channel grammar");
        }
    }
    None
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for CacheKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for CacheKey {
    type Error = KeyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}
