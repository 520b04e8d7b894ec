//! Domain-level error types.
//!
//! These errors are transport agnostic. Callers map them to HTTP responses or
//! any other protocol-specific envelope; [`ErrorCode::status_hint`] records the
//! HTTP status each code conventionally maps to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable machine-readable error code describing the failure category.
///
/// Clients branch on these values (prompt a top-up, show the quota screen,
/// fix the request), so variants are never renamed once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request is malformed or fails validation.
    InvalidRequest,
    /// The requested hold time is not a valid per-request duration.
    InvalidHoldTime,
    /// The extension would push custody past the lifetime retention cap.
    MaxRetentionExceeded,
    /// The monthly data cap would be exceeded.
    QuotaExceeded,
    /// The account cannot afford the request.
    InsufficientBalance,
    /// The storage engine could not report the object size.
    ObjectStatFailed,
    /// The storage engine rejected the content.
    StorageAddFailed,
    /// The price could not be computed.
    CostCalculationFailed,
    /// Monthly usage could not be committed after the debit.
    UsageUpdateFailed,
    /// The pin instruction could not be handed to the queue.
    QueuePublishFailed,
    /// The retention extension could not be recorded.
    PinExtendFailed,
    /// No upload owned by the caller matches the request.
    UploadNotFound,
    /// Authenticated but not permitted to perform this action.
    Forbidden,
    /// A dependency is temporarily unavailable.
    ServiceUnavailable,
    /// An unexpected error occurred inside the domain.
    InternalError,
}

impl ErrorCode {
    /// HTTP status conventionally used when surfacing this code.
    ///
    /// # Examples
    /// ```
    /// use pinledger::domain::ErrorCode;
    ///
    /// assert_eq!(ErrorCode::InsufficientBalance.status_hint(), 402);
    /// ```
    pub const fn status_hint(self) -> u16 {
        match self {
            Self::InsufficientBalance => 402,
            Self::Forbidden => 403,
            Self::UploadNotFound => 404,
            Self::ServiceUnavailable => 503,
            Self::InternalError => 500,
            Self::InvalidRequest
            | Self::InvalidHoldTime
            | Self::MaxRetentionExceeded
            | Self::QuotaExceeded
            | Self::ObjectStatFailed
            | Self::StorageAddFailed
            | Self::CostCalculationFailed
            | Self::UsageUpdateFailed
            | Self::QueuePublishFailed
            | Self::PinExtendFailed => 400,
        }
    }
}

/// Domain error payload.
///
/// ## Invariants
/// - `message` must be non-empty once trimmed of whitespace.
///
/// # Examples
/// ```
/// use pinledger::domain::{Error, ErrorCode};
///
/// let err = Error::new(ErrorCode::UploadNotFound, "missing");
/// assert_eq!(err.code(), ErrorCode::UploadNotFound);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(try_from = "ErrorDto", into = "ErrorDto")]
pub struct Error {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Validation errors emitted by the constructors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorValidationError {
    /// The message was blank.
    #[error("error message must not be empty")]
    EmptyMessage,
}

impl Error {
    /// Create a new error, substituting a placeholder for a blank message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::try_new(code, message).unwrap_or_else(|_| Self {
            code,
            message: "unspecified error".to_owned(),
            details: None,
        })
    }

    /// Fallible constructor that validates the message content.
    pub fn try_new(code: ErrorCode, message: impl Into<String>) -> Result<Self, ErrorValidationError> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(ErrorValidationError::EmptyMessage);
        }
        Ok(Self {
            code,
            message,
            details: None,
        })
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Supplementary error details.
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Attach structured details to the error.
    ///
    /// # Examples
    /// ```
    /// use pinledger::domain::Error;
    /// use serde_json::json;
    ///
    /// let err = Error::quota_exceeded("over cap").with_details(json!({ "limit_bytes": 10 }));
    /// assert!(err.details().is_some());
    /// ```
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convenience constructor for [`ErrorCode::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Convenience constructor for [`ErrorCode::InvalidHoldTime`].
    pub fn invalid_hold_time(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidHoldTime, message)
    }

    /// Convenience constructor for [`ErrorCode::MaxRetentionExceeded`].
    pub fn max_retention_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MaxRetentionExceeded, message)
    }

    /// Convenience constructor for [`ErrorCode::QuotaExceeded`].
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QuotaExceeded, message)
    }

    /// Convenience constructor for [`ErrorCode::InsufficientBalance`].
    pub fn insufficient_balance(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InsufficientBalance, message)
    }

    /// Convenience constructor for [`ErrorCode::ObjectStatFailed`].
    pub fn object_stat_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ObjectStatFailed, message)
    }

    /// Convenience constructor for [`ErrorCode::StorageAddFailed`].
    pub fn storage_add_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageAddFailed, message)
    }

    /// Convenience constructor for [`ErrorCode::CostCalculationFailed`].
    pub fn cost_calculation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CostCalculationFailed, message)
    }

    /// Convenience constructor for [`ErrorCode::UsageUpdateFailed`].
    pub fn usage_update_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UsageUpdateFailed, message)
    }

    /// Convenience constructor for [`ErrorCode::QueuePublishFailed`].
    pub fn queue_publish_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QueuePublishFailed, message)
    }

    /// Convenience constructor for [`ErrorCode::PinExtendFailed`].
    pub fn pin_extend_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PinExtendFailed, message)
    }

    /// Convenience constructor for [`ErrorCode::UploadNotFound`].
    pub fn upload_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UploadNotFound, message)
    }

    /// Convenience constructor for [`ErrorCode::Forbidden`].
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// Convenience constructor for [`ErrorCode::ServiceUnavailable`].
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Convenience constructor for [`ErrorCode::InternalError`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDto {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl From<Error> for ErrorDto {
    fn from(value: Error) -> Self {
        Self {
            code: value.code,
            message: value.message,
            details: value.details,
        }
    }
}

impl TryFrom<ErrorDto> for Error {
    type Error = ErrorValidationError;

    fn try_from(value: ErrorDto) -> Result<Self, Self::Error> {
        let ErrorDto {
            code,
            message,
            details,
        } = value;

        let mut error = Error::try_new(code, message)?;
        error.details = details;
        Ok(error)
    }
}

#[cfg(test)]
mod tests;
