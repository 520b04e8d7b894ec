//! Driven port for the content-addressed storage engine.

use async_trait::async_trait;

use crate::domain::ContentHash;

use super::define_port_error;

/// Size information reported by the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    /// Total bytes of the object and everything it links to.
    pub cumulative_size: u64,
}

define_port_error! {
    /// Errors surfaced while calling the storage engine.
    pub enum ContentStoreError {
        /// The engine does not know the hash.
        NotFound { hash: String } => "content not found: {hash}",
        /// Network transport failed before receiving a response.
        Transport { message: String } => "storage transport failed: {message}",
        /// The call exceeded its timeout.
        Timeout { message: String } => "storage call timed out: {message}",
        /// The engine rejected the request.
        Rejected { message: String } => "storage engine rejected request: {message}",
        /// The response could not be decoded.
        Decode { message: String } => "storage response decode failed: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Report the cumulative size of `hash`.
    async fn stat(&self, hash: &ContentHash) -> Result<ObjectStat, ContentStoreError>;

    /// Store `bytes`, or with `only_hash` just compute the hash they would get.
    async fn add(&self, bytes: &[u8], only_hash: bool) -> Result<ContentHash, ContentStoreError>;
}
