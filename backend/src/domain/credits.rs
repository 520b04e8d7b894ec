//! Fixed-point credit amounts.
//!
//! Balances and prices are held as whole micro-credits so ledger arithmetic is
//! exact. One credit is [`MICROS_PER_CREDIT`] micro-credits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of micro-credits in one credit.
pub const MICROS_PER_CREDIT: i64 = 1_000_000;

const FRACTION_DIGITS: usize = 6;

/// Errors returned when parsing or constructing a [`Credits`] amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreditsError {
    /// Amounts must not be negative.
    #[error("credit amount must not be negative")]
    Negative,
    /// The text is not a decimal number.
    #[error("credit amount must be a decimal number: {0}")]
    Malformed(String),
    /// More than six fractional digits were supplied.
    #[error("credit amount supports at most {FRACTION_DIGITS} decimal places")]
    TooPrecise,
    /// The value does not fit the ledger range.
    #[error("credit amount is out of range")]
    OutOfRange,
}

/// Non-negative amount of credits, stored as micro-credits.
///
/// Serialises as a decimal string so clients never see floating-point
/// rounding.
///
/// # Examples
/// ```
/// use pinledger::domain::Credits;
///
/// let amount: Credits = "1.25".parse().expect("valid amount");
/// assert_eq!(amount.as_micros(), 1_250_000);
/// assert_eq!(amount.to_string(), "1.25");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Credits(i64);

impl Credits {
    /// The zero amount.
    pub const ZERO: Self = Self(0);

    /// Construct from micro-credits, rejecting negative values.
    pub fn from_micros(micros: i64) -> Result<Self, CreditsError> {
        if micros < 0 {
            return Err(CreditsError::Negative);
        }
        Ok(Self(micros))
    }

    /// Construct from a micro-credit count that cannot be negative.
    pub const fn from_small_micros(micros: u32) -> Self {
        Self(micros as i64)
    }

    /// Construct from a whole number of credits.
    pub fn from_whole(credits: i64) -> Result<Self, CreditsError> {
        let micros = credits
            .checked_mul(MICROS_PER_CREDIT)
            .ok_or(CreditsError::OutOfRange)?;
        Self::from_micros(micros)
    }

    /// Raw micro-credit value.
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Whether the amount is zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Add two amounts, returning `None` on overflow.
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Subtract `other`, returning `None` when the result would be negative.
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0
            .checked_sub(other.0)
            .filter(|value| *value >= 0)
            .map(Self)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / MICROS_PER_CREDIT;
        let fraction = self.0 % MICROS_PER_CREDIT;
        if fraction == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{fraction:0width$}", width = FRACTION_DIGITS);
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl FromStr for Credits {
    type Err = CreditsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.starts_with('-') {
            return Err(CreditsError::Negative);
        }
        let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let is_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if whole.is_empty() || !is_digits(whole) || !is_digits(fraction) {
            return Err(CreditsError::Malformed(raw.to_owned()));
        }
        if fraction.len() > FRACTION_DIGITS {
            return Err(CreditsError::TooPrecise);
        }

        let whole: i64 = whole.parse().map_err(|_| CreditsError::OutOfRange)?;
        let padded = format!("{fraction:0<width$}", width = FRACTION_DIGITS);
        let fraction: i64 = padded.parse().map_err(|_| CreditsError::OutOfRange)?;
        let micros = whole
            .checked_mul(MICROS_PER_CREDIT)
            .and_then(|value| value.checked_add(fraction))
            .ok_or(CreditsError::OutOfRange)?;
        Ok(Self(micros))
    }
}

impl TryFrom<String> for Credits {
    type Error = CreditsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Credits> for String {
    fn from(value: Credits) -> Self {
        value.to_string()
    }
}
