//! Retention-window policy.
//!
//! Pure functions validating hold durations and computing garbage-collect
//! deadlines. Nothing here touches the ledger.

use chrono::{DateTime, Months, Utc};

/// Longest hold a single request may ask for.
pub const DEFAULT_MAX_HOLD_MONTHS_PER_REQUEST: u32 = 6;
/// Longest total custody for one (hash, network, user) triple.
pub const DEFAULT_MAX_LIFETIME_MONTHS: u32 = 24;

/// Violations of the retention policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetentionError {
    #[error("hold time must be between 1 and {max} months, got {requested}")]
    InvalidHoldTime { requested: u32, max: u32 },
    #[error("retention would end {requested}, past the lifetime limit of {limit}")]
    MaxRetentionExceeded {
        requested: DateTime<Utc>,
        limit: DateTime<Utc>,
    },
    #[error("deadline is outside the representable range")]
    DeadlineOutOfRange,
}

/// Limits applied to every hold request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_hold_months_per_request: u32,
    pub max_lifetime_months: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_hold_months_per_request: DEFAULT_MAX_HOLD_MONTHS_PER_REQUEST,
            max_lifetime_months: DEFAULT_MAX_LIFETIME_MONTHS,
        }
    }
}

impl RetentionPolicy {
    /// Reject zero or over-long per-request holds.
    ///
    /// # Examples
    /// ```
    /// use pinledger::domain::RetentionPolicy;
    ///
    /// let policy = RetentionPolicy::default();
    /// assert!(policy.validate_hold_months(6).is_ok());
    /// assert!(policy.validate_hold_months(0).is_err());
    /// assert!(policy.validate_hold_months(7).is_err());
    /// ```
    pub fn validate_hold_months(&self, months: u32) -> Result<u32, RetentionError> {
        if months == 0 || months > self.max_hold_months_per_request {
            return Err(RetentionError::InvalidHoldTime {
                requested: months,
                max: self.max_hold_months_per_request,
            });
        }
        Ok(months)
    }

    /// Latest deadline allowed for custody that began at `first_pinned_at`.
    pub fn lifetime_limit(&self, first_pinned_at: DateTime<Utc>) -> Result<DateTime<Utc>, RetentionError> {
        deadline_after(first_pinned_at, self.max_lifetime_months)
    }

    /// Extend `current` by `months`, refusing to pass the lifetime limit.
    pub fn extended_deadline(
        &self,
        first_pinned_at: DateTime<Utc>,
        current: DateTime<Utc>,
        months: u32,
    ) -> Result<DateTime<Utc>, RetentionError> {
        let requested = deadline_after(current, months)?;
        let limit = self.lifetime_limit(first_pinned_at)?;
        if requested > limit {
            return Err(RetentionError::MaxRetentionExceeded { requested, limit });
        }
        Ok(requested)
    }
}

/// Calendar-aware `start + months`.
pub fn deadline_after(start: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>, RetentionError> {
    start
        .checked_add_months(Months::new(months))
        .ok_or(RetentionError::DeadlineOutOfRange)
}
