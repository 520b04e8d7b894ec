//! Content-addressed identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Minimum accepted length of a content hash.
pub const CONTENT_HASH_MIN: usize = 10;
/// Maximum accepted length of a content hash.
pub const CONTENT_HASH_MAX: usize = 128;
/// Network used when a request does not name one.
pub const DEFAULT_NETWORK: &str = "public";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentValidationError {
    #[error("content hash must be {min}..={max} characters")]
    HashLength { min: usize, max: usize },
    #[error("content hash must be ASCII alphanumeric")]
    HashCharacters,
    #[error("network name must not be empty")]
    EmptyNetwork,
}

/// Identifier returned by the storage engine for a piece of content.
///
/// # Examples
/// ```
/// use pinledger::domain::ContentHash;
///
/// let hash = ContentHash::new("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG");
/// assert!(hash.is_ok());
/// assert!(ContentHash::new("not a hash").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Validate and construct a [`ContentHash`].
    pub fn new(raw: impl Into<String>) -> Result<Self, ContentValidationError> {
        let raw = raw.into();
        let length = raw.len();
        if !(CONTENT_HASH_MIN..=CONTENT_HASH_MAX).contains(&length) {
            return Err(ContentValidationError::HashLength {
                min: CONTENT_HASH_MIN,
                max: CONTENT_HASH_MAX,
            });
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ContentValidationError::HashCharacters);
        }
        Ok(Self(raw))
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = ContentValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

/// Logical storage network a record belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkName(String);

impl NetworkName {
    pub fn new(raw: impl Into<String>) -> Result<Self, ContentValidationError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ContentValidationError::EmptyNetwork);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// The shared public network.
    pub fn public() -> Self {
        Self(DEFAULT_NETWORK.to_owned())
    }
}

impl Default for NetworkName {
    fn default() -> Self {
        Self::public()
    }
}

impl AsRef<str> for NetworkName {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for NetworkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NetworkName {
    type Error = ContentValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NetworkName> for String {
    fn from(value: NetworkName) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("short")]
    #[case("Qm-has-dashes-in-it")]
    fn content_hash_rejects_invalid_values(#[case] raw: &str) {
        assert!(ContentHash::new(raw).is_err());
    }

    #[rstest]
    fn network_name_trims_and_defaults() {
        assert_eq!(NetworkName::new(" lab ").expect("valid").as_ref(), "lab");
        assert_eq!(NetworkName::default().as_ref(), DEFAULT_NETWORK);
        assert_eq!(NetworkName::new("   "), Err(ContentValidationError::EmptyNetwork));
    }
}
