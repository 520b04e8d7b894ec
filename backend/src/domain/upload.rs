//! Upload records and the pure merge that reconciles repeated pins.
//!
//! Every function here is side-effect free. Adapters call them inside a
//! transaction keyed by (hash, network) so the stored record only ever moves
//! forward: the garbage-collect deadline never shrinks and uploaders are only
//! ever added.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::retention::{RetentionError, RetentionPolicy, deadline_after};
use super::{ContentHash, NetworkName, Username};

/// How the content reached the storage engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    /// Pinned by hash; the bytes came from elsewhere.
    #[default]
    Pin,
    /// Uploaded through this service.
    File,
}

impl UploadKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pin => "pin",
            Self::File => "file",
        }
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`UploadKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown upload kind: {0}")]
pub struct UnknownUploadKind(pub String);

impl FromStr for UploadKind {
    type Err = UnknownUploadKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pin" => Ok(Self::Pin),
            "file" => Ok(Self::File),
            other => Err(UnknownUploadKind(other.to_owned())),
        }
    }
}

/// Durable custody of one content hash on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub hash: ContentHash,
    pub network: NetworkName,
    pub kind: UploadKind,
    /// Hold duration that produced the current deadline.
    pub hold_months: u32,
    pub gc_deadline: DateTime<Utc>,
    /// Every user that has ever referenced this hash, without duplicates.
    pub uploaders: BTreeSet<Username>,
    pub encrypted: bool,
    /// When custody first began.
    pub created_at: DateTime<Utc>,
}

impl UploadRecord {
    /// Whether `username` has referenced this content.
    pub fn is_owned_by(&self, username: &Username) -> bool {
        self.uploaders.contains(username)
    }
}

/// One accepted request to hold content, as replayed by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadClaim {
    pub hash: ContentHash,
    pub network: NetworkName,
    pub username: Username,
    pub kind: UploadKind,
    pub hold_months: u32,
    pub encrypted: bool,
    /// Instant the request was accepted; the candidate deadline counts from here.
    pub requested_at: DateTime<Utc>,
}

/// Reasons a record update is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadMergeError {
    #[error("no upload record exists for this content")]
    NotFound,
    #[error("{0}")]
    Retention(#[from] RetentionError),
}

/// Build the record a first-time claim produces.
pub fn record_from_claim(claim: &UploadClaim) -> Result<UploadRecord, UploadMergeError> {
    let gc_deadline = deadline_after(claim.requested_at, claim.hold_months)?;
    Ok(UploadRecord {
        hash: claim.hash.clone(),
        network: claim.network.clone(),
        kind: claim.kind,
        hold_months: claim.hold_months,
        gc_deadline,
        uploaders: BTreeSet::from([claim.username.clone()]),
        encrypted: claim.encrypted,
        created_at: claim.requested_at,
    })
}

/// Fold a claim into the current record, if any.
///
/// The merge is commutative and idempotent: the retained deadline is the max
/// of both candidates, uploaders are a set union, and the remaining fields
/// take their order-independent extreme.
///
/// # Examples
/// ```
/// use chrono::{TimeZone, Utc};
/// use pinledger::domain::{ContentHash, NetworkName, UploadClaim, UploadKind, Username, merge_claim};
///
/// let claim = UploadClaim {
///     hash: ContentHash::new("QmExampleHash0001").expect("valid hash"),
///     network: NetworkName::public(),
///     username: Username::new("alice").expect("valid username"),
///     kind: UploadKind::Pin,
///     hold_months: 1,
///     encrypted: false,
///     requested_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().expect("valid time"),
/// };
/// let once = merge_claim(None, &claim).expect("merge succeeds");
/// let twice = merge_claim(Some(once.clone()), &claim).expect("merge succeeds");
/// assert_eq!(once, twice);
/// ```
pub fn merge_claim(
    existing: Option<UploadRecord>,
    claim: &UploadClaim,
) -> Result<UploadRecord, UploadMergeError> {
    let incoming = record_from_claim(claim)?;
    let Some(current) = existing else {
        return Ok(incoming);
    };
    Ok(merge_records(current, incoming))
}

/// Pure union of two records for the same (hash, network).
pub fn merge_records(current: UploadRecord, incoming: UploadRecord) -> UploadRecord {
    let (gc_deadline, hold_months) = match current.gc_deadline.cmp(&incoming.gc_deadline) {
        std::cmp::Ordering::Greater => (current.gc_deadline, current.hold_months),
        std::cmp::Ordering::Less => (incoming.gc_deadline, incoming.hold_months),
        std::cmp::Ordering::Equal => (
            current.gc_deadline,
            current.hold_months.max(incoming.hold_months),
        ),
    };

    let mut uploaders = current.uploaders;
    uploaders.extend(incoming.uploaders);

    UploadRecord {
        hash: current.hash,
        network: current.network,
        kind: current.kind.max(incoming.kind),
        hold_months,
        gc_deadline,
        uploaders,
        encrypted: current.encrypted || incoming.encrypted,
        created_at: current.created_at.min(incoming.created_at),
    }
}

/// Push the deadline of an existing record out by `months`.
///
/// Fails with [`UploadMergeError::NotFound`] when there is no record and with
/// a retention error when the new deadline would pass the lifetime limit.
pub fn extend_record(
    existing: Option<UploadRecord>,
    months: u32,
    policy: &RetentionPolicy,
) -> Result<UploadRecord, UploadMergeError> {
    let mut record = existing.ok_or(UploadMergeError::NotFound)?;
    record.gc_deadline = policy.extended_deadline(record.created_at, record.gc_deadline, months)?;
    record.hold_months = record.hold_months.saturating_add(months);
    Ok(record)
}
