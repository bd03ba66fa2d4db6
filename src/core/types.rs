//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Rev`] - Validated full object id (40 hex characters)
//! - [`TypeError`] - Validation failures
//!
//! # Validation
//!
//! [`Rev`] enforces validity at construction time. A short prefix is never
//! a `Rev`; short forms stay plain `&str` until the storage layer resolves
//! them against the current cache.
//!
//! # Examples
//!
//! ```
//! use gitstore::core::types::Rev;
//!
//! let rev = Rev::new("abc123def4567890abc123def4567890abc12345").unwrap();
//! assert_eq!(rev.bucket(), "abc1");
//!
//! assert!(Rev::new("abc123").is_err());
//! assert!(Rev::new("not-a-sha").is_err());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid object id: {0}")]
    InvalidRev(String),
}

/// Number of hex characters in a short-index bucket key.
pub const BUCKET_LEN: usize = 4;

/// A validated full object id naming a commit, tree, or blob.
///
/// Exactly 40 lowercase hex characters. Uppercase input is normalized on
/// construction so two spellings of the same id compare equal.
///
/// # Example
///
/// ```
/// use gitstore::core::types::Rev;
///
/// let rev = Rev::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(rev.as_str(), "abc123def4567890abc123def4567890abc12345");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rev(String);

impl Rev {
    /// Create a new validated object id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRev` unless the input is exactly 40 hex
    /// characters.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.len() != 40 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidRev(id));
        }
        Ok(Self(id.to_ascii_lowercase()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first [`BUCKET_LEN`] characters, keying the short-revision index.
    pub fn bucket(&self) -> &str {
        &self.0[..BUCKET_LEN]
    }

    /// A prefix of the given length, clamped to the full id.
    pub fn prefix(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl fmt::Display for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Rev {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rev> for String {
    fn from(rev: Rev) -> Self {
        rev.0
    }
}

impl AsRef<str> for Rev {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// True if `s` could be a short form: 4..=40 hex characters.
pub fn looks_like_short_rev(s: &str) -> bool {
    (BUCKET_LEN..=40).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha(fill: char) -> String {
        std::iter::repeat(fill).take(40).collect()
    }

    #[test]
    fn accepts_full_hex_id() {
        let rev = Rev::new(sha('a')).unwrap();
        assert_eq!(rev.as_str(), sha('a'));
    }

    #[test]
    fn normalizes_to_lowercase() {
        let rev = Rev::new(sha('A')).unwrap();
        assert_eq!(rev.as_str(), sha('a'));
        assert_eq!(rev, Rev::new(sha('a')).unwrap());
    }

    #[test]
    fn rejects_short_and_invalid() {
        assert!(Rev::new("abcd").is_err());
        assert!(Rev::new("").is_err());
        assert!(Rev::new(sha('g')).is_err());
        let mut long = sha('a');
        long.push('a');
        assert!(Rev::new(long).is_err());
    }

    #[test]
    fn bucket_is_first_four_chars() {
        let rev = Rev::new("abc123def4567890abc123def4567890abc12345").unwrap();
        assert_eq!(rev.bucket(), "abc1");
        assert_eq!(rev.prefix(7), "abc123d");
        assert_eq!(rev.prefix(99), rev.as_str());
    }

    #[test]
    fn short_rev_shape() {
        assert!(looks_like_short_rev("abcd"));
        assert!(looks_like_short_rev("abc123d"));
        assert!(!looks_like_short_rev("abc"));
        assert!(!looks_like_short_rev("main"));
        assert!(!looks_like_short_rev("refs/heads/x"));
    }
}
