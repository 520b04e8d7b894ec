use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::ports::{
    OwnershipReservation, UploadMutation, UploadRepository, UploadRepositoryError,
};
use crate::domain::{ContentHash, NetworkName, UploadRecord, Username};

use super::{FailureBudget, lock};

type RecordKey = (ContentHash, NetworkName);
type OwnerKey = (ContentHash, NetworkName, Username);

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<RecordKey, UploadRecord>,
    owners: HashSet<OwnerKey>,
}

/// Upload records and ownership rows held in memory.
///
/// `upsert_with` runs the mutation while holding the table lock, the same
/// serialisation the database adapter gets from `SELECT … FOR UPDATE`.
#[derive(Debug, Default)]
pub struct InMemoryUploadRepository {
    tables: Mutex<Tables>,
    upsert_failures: FailureBudget,
}

impl InMemoryUploadRepository {
    /// Seed a record and ownership rows for its uploaders.
    pub fn insert(&self, record: UploadRecord) {
        let mut tables = lock(&self.tables);
        for uploader in &record.uploaders {
            tables
                .owners
                .insert((record.hash.clone(), record.network.clone(), uploader.clone()));
        }
        tables
            .records
            .insert((record.hash.clone(), record.network.clone()), record);
    }

    pub fn record(&self, hash: &ContentHash, network: &NetworkName) -> Option<UploadRecord> {
        lock(&self.tables)
            .records
            .get(&(hash.clone(), network.clone()))
            .cloned()
    }

    pub fn is_reserved(&self, username: &Username, hash: &ContentHash, network: &NetworkName) -> bool {
        lock(&self.tables)
            .owners
            .contains(&(hash.clone(), network.clone(), username.clone()))
    }

    pub fn record_count(&self) -> usize {
        lock(&self.tables).records.len()
    }

    /// Fail the next `count` upserts with a transient query error.
    pub fn fail_upserts(&self, count: u32) {
        self.upsert_failures.set(count);
    }
}

#[async_trait]
impl UploadRepository for InMemoryUploadRepository {
    async fn find_owned(
        &self,
        username: &Username,
        hash: &ContentHash,
        network: &NetworkName,
    ) -> Result<Option<UploadRecord>, UploadRepositoryError> {
        Ok(self
            .record(hash, network)
            .filter(|record| record.is_owned_by(username)))
    }

    async fn reserve_ownership(
        &self,
        username: &Username,
        hash: &ContentHash,
        network: &NetworkName,
    ) -> Result<OwnershipReservation, UploadRepositoryError> {
        let inserted = lock(&self.tables)
            .owners
            .insert((hash.clone(), network.clone(), username.clone()));
        Ok(if inserted {
            OwnershipReservation::Reserved
        } else {
            OwnershipReservation::AlreadyOwned
        })
    }

    async fn release_ownership(
        &self,
        username: &Username,
        hash: &ContentHash,
        network: &NetworkName,
    ) -> Result<(), UploadRepositoryError> {
        lock(&self.tables)
            .owners
            .remove(&(hash.clone(), network.clone(), username.clone()));
        Ok(())
    }

    async fn upsert_with(
        &self,
        hash: &ContentHash,
        network: &NetworkName,
        mutation: UploadMutation,
    ) -> Result<UploadRecord, UploadRepositoryError> {
        if self.upsert_failures.take() {
            return Err(UploadRepositoryError::query("injected upsert failure"));
        }
        let mut tables = lock(&self.tables);
        let key = (hash.clone(), network.clone());
        let current = tables.records.get(&key).cloned();
        let next = mutation(current).map_err(UploadRepositoryError::rejected)?;
        for uploader in &next.uploaders {
            tables
                .owners
                .insert((hash.clone(), network.clone(), uploader.clone()));
        }
        tables.records.insert(key, next.clone());
        Ok(next)
    }
}
