use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::ContentHash;
use crate::domain::ports::{ContentStore, ContentStoreError, ObjectStat};

use super::{FailureBudget, lock};

/// Content store that knows sizes up front and derives hashes from bytes.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    objects: Mutex<HashMap<ContentHash, u64>>,
    stat_failures: FailureBudget,
    add_failures: FailureBudget,
}

impl InMemoryContentStore {
    /// Make `hash` known with the given cumulative size.
    pub fn insert(&self, hash: &ContentHash, cumulative_size: u64) {
        lock(&self.objects).insert(hash.clone(), cumulative_size);
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        lock(&self.objects).contains_key(hash)
    }

    /// Hash `bytes` would be stored under.
    pub fn hash_for(bytes: &[u8]) -> ContentHash {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        let digest = hasher.finish();
        ContentHash::new(format!("Qm{digest:016x}{:08x}", bytes.len()))
            .unwrap_or_else(|err| panic!("derived hash must be valid: {err}"))
    }

    /// Fail the next `count` stat calls.
    pub fn fail_stats(&self, count: u32) {
        self.stat_failures.set(count);
    }

    /// Fail the next `count` storing adds; hash-only adds still succeed.
    pub fn fail_adds(&self, count: u32) {
        self.add_failures.set(count);
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn stat(&self, hash: &ContentHash) -> Result<ObjectStat, ContentStoreError> {
        if self.stat_failures.take() {
            return Err(ContentStoreError::timeout("injected stat failure"));
        }
        lock(&self.objects)
            .get(hash)
            .map(|size| ObjectStat {
                cumulative_size: *size,
            })
            .ok_or_else(|| ContentStoreError::not_found(hash.as_ref()))
    }

    async fn add(&self, bytes: &[u8], only_hash: bool) -> Result<ContentHash, ContentStoreError> {
        let hash = Self::hash_for(bytes);
        if only_hash {
            return Ok(hash);
        }
        if self.add_failures.take() {
            return Err(ContentStoreError::transport("injected add failure"));
        }
        let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        self.insert(&hash, size);
        Ok(hash)
    }
}
