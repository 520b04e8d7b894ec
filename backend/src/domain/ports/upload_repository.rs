//! Port for durable upload records and ownership reservations.
//!
//! Records are keyed by (hash, network). Ownership rows are keyed by
//! (hash, network, user) and are what makes "already owned" detection race
//! free: two concurrent first-time pins of the same content by the same user
//! cannot both reserve.

use async_trait::async_trait;

use crate::domain::{ContentHash, NetworkName, UploadMergeError, UploadRecord, Username};

use super::define_port_error;

define_port_error! {
    /// Errors raised by upload repository adapters.
    pub enum UploadRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } => "upload repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "upload repository query failed: {message}",
        /// The mutation refused to produce a new record.
        Rejected { reason: UploadMergeError } => "upload update rejected: {reason}",
    }
}

impl UploadRepositoryError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Query { .. })
    }
}

/// Result of attempting to reserve ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipReservation {
    /// This call created the reservation.
    Reserved,
    /// The user already owned, or was already acquiring, the content.
    AlreadyOwned,
}

/// Pure record transition applied under the row lock.
///
/// Receives the current record, if any, and returns the record to persist.
pub type UploadMutation =
    Box<dyn FnOnce(Option<UploadRecord>) -> Result<UploadRecord, UploadMergeError> + Send>;

#[async_trait]
pub trait UploadRepository: Send + Sync {
    /// Record for (hash, network) if `username` is among its uploaders.
    async fn find_owned(
        &self,
        username: &Username,
        hash: &ContentHash,
        network: &NetworkName,
    ) -> Result<Option<UploadRecord>, UploadRepositoryError>;

    /// Atomically claim (hash, network, user).
    async fn reserve_ownership(
        &self,
        username: &Username,
        hash: &ContentHash,
        network: &NetworkName,
    ) -> Result<OwnershipReservation, UploadRepositoryError>;

    /// Drop a reservation made by [`UploadRepository::reserve_ownership`].
    async fn release_ownership(
        &self,
        username: &Username,
        hash: &ContentHash,
        network: &NetworkName,
    ) -> Result<(), UploadRepositoryError>;

    /// Read, transform, and write the record for (hash, network) in one
    /// transaction, holding a lock on the row so concurrent updates serialise.
    ///
    /// Every uploader in the written record also gains an ownership row.
    async fn upsert_with(
        &self,
        hash: &ContentHash,
        network: &NetworkName,
        mutation: UploadMutation,
    ) -> Result<UploadRecord, UploadRepositoryError>;
}
