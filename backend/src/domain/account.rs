//! Account identity, tier, and metered usage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum allowed length for a username.
pub const USERNAME_MAX: usize = 64;

/// Validation errors returned by account value constructors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountValidationError {
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("username must not contain surrounding whitespace")]
    UntrimmedUsername,
    #[error("username must be at most {max} characters")]
    UsernameTooLong { max: usize },
    #[error("unknown account tier: {0}")]
    UnknownTier(String),
}

/// Unique account key.
///
/// # Examples
/// ```
/// use pinledger::domain::Username;
///
/// let user = Username::new("alice").expect("valid username");
/// assert_eq!(user.as_ref(), "alice");
/// assert!(Username::new("  ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Validate and construct a [`Username`].
    pub fn new(raw: impl Into<String>) -> Result<Self, AccountValidationError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(AccountValidationError::EmptyUsername);
        }
        if raw.trim() != raw {
            return Err(AccountValidationError::UntrimmedUsername);
        }
        if raw.chars().count() > USERNAME_MAX {
            return Err(AccountValidationError::UsernameTooLong { max: USERNAME_MAX });
        }
        Ok(Self(raw))
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Username {
    type Error = AccountValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

/// Billing tier of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Partner,
    Light,
    Plus,
}

impl Tier {
    /// Stable storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Partner => "partner",
            Self::Light => "light",
            Self::Plus => "plus",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = AccountValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "free" => Ok(Self::Free),
            "partner" => Ok(Self::Partner),
            "light" => Ok(Self::Light),
            "plus" => Ok(Self::Plus),
            other => Err(AccountValidationError::UnknownTier(other.to_owned())),
        }
    }
}

/// Snapshot of an account's tier and monthly counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUsage {
    pub username: Username,
    pub tier: Tier,
    pub data_used_bytes: u64,
    pub data_limit_bytes: u64,
    pub pubsub_messages_sent: u64,
    pub pubsub_messages_limit: u64,
}

impl AccountUsage {
    /// Bytes left before the monthly cap is reached.
    pub fn remaining_bytes(&self) -> u64 {
        self.data_limit_bytes.saturating_sub(self.data_used_bytes)
    }

    /// Whether `additional` bytes fit under the monthly cap.
    ///
    /// # Examples
    /// ```
    /// use pinledger::domain::{AccountUsage, Tier, Username};
    ///
    /// let usage = AccountUsage {
    ///     username: Username::new("alice").expect("valid"),
    ///     tier: Tier::Light,
    ///     data_used_bytes: 90,
    ///     data_limit_bytes: 100,
    ///     pubsub_messages_sent: 0,
    ///     pubsub_messages_limit: 0,
    /// };
    /// assert!(usage.can_store(10));
    /// assert!(!usage.can_store(11));
    /// ```
    pub fn can_store(&self, additional: u64) -> bool {
        self.data_used_bytes
            .checked_add(additional)
            .is_some_and(|total| total <= self.data_limit_bytes)
    }

    /// Pub/sub messages left before the monthly cap is reached.
    pub fn remaining_pubsub_messages(&self) -> u64 {
        self.pubsub_messages_limit
            .saturating_sub(self.pubsub_messages_sent)
    }

    /// Whether `messages` more pub/sub publishes fit under the monthly cap.
    pub fn can_publish_pubsub(&self, messages: u64) -> bool {
        self.pubsub_messages_sent
            .checked_add(messages)
            .is_some_and(|total| total <= self.pubsub_messages_limit)
    }
}
