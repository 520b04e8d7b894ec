//! Port for the per-account monthly data and pub/sub counters.

use async_trait::async_trait;

use crate::domain::{AccountUsage, Username};

use super::define_port_error;

define_port_error! {
    /// Errors raised by usage meter adapters.
    pub enum UsageMeterError {
        /// Adding the bytes would pass the monthly cap.
        CapExceeded { used_bytes: u64, limit_bytes: u64, requested_bytes: u64 } =>
            "monthly data cap exceeded: {used_bytes} of {limit_bytes} bytes used, {requested_bytes} requested",
        /// Publishing would pass the monthly pub/sub message cap.
        PubSubCapExceeded { sent: u64, limit: u64, requested: u64 } =>
            "monthly pub/sub cap exceeded: {sent} of {limit} messages sent, {requested} requested",
        /// No account exists for the username.
        AccountNotFound { username: String } => "account not found: {username}",
        /// Meter connection could not be established.
        Connection { message: String } => "usage meter connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "usage meter query failed: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageMeter: Send + Sync {
    /// Tier and counters for the account.
    async fn find_usage(&self, username: &Username) -> Result<AccountUsage, UsageMeterError>;

    /// Check whether `additional_bytes` would fit under the cap.
    ///
    /// This is advisory; [`UsageMeter::update_usage`] re-checks atomically.
    async fn can_upload(
        &self,
        username: &Username,
        additional_bytes: u64,
    ) -> Result<(), UsageMeterError>;

    /// Add `bytes` to the monthly counter if the cap still allows it.
    async fn update_usage(&self, username: &Username, bytes: u64) -> Result<(), UsageMeterError>;

    /// Subtract `bytes` from the monthly counter, saturating at zero.
    async fn reduce_usage(&self, username: &Username, bytes: u64) -> Result<(), UsageMeterError>;

    /// Check whether `messages` more pub/sub publishes fit under the cap.
    ///
    /// Advisory, like [`UsageMeter::can_upload`].
    async fn can_publish_pubsub(
        &self,
        username: &Username,
        messages: u64,
    ) -> Result<(), UsageMeterError>;

    /// Add `messages` to the pub/sub counter if the cap still allows it.
    async fn increment_pubsub_usage(
        &self,
        username: &Username,
        messages: u64,
    ) -> Result<(), UsageMeterError>;
}
