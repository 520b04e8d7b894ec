//! DTOs for decoding IPFS RPC responses.

use serde::Deserialize;

use crate::domain::ports::ObjectStat;
use crate::domain::{ContentHash, ContentValidationError};

/// Body of `/api/v0/object/stat`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ObjectStatDto {
    pub(super) cumulative_size: u64,
}

impl From<ObjectStatDto> for ObjectStat {
    fn from(value: ObjectStatDto) -> Self {
        Self {
            cumulative_size: value.cumulative_size,
        }
    }
}

/// Body of `/api/v0/add`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AddResponseDto {
    pub(super) hash: String,
}

impl AddResponseDto {
    pub(super) fn into_hash(self) -> Result<ContentHash, ContentValidationError> {
        ContentHash::new(self.hash)
    }
}

/// Error envelope returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ErrorDto {
    pub(super) message: String,
}
