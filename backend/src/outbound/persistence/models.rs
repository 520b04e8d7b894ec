//! Internal Diesel row structs.
//!
//! Rows stay inside the persistence layer; repositories convert them into
//! domain values and surface conversion failures as query errors.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::schema::{accounts, pin_messages, upload_owners, uploads};

/// Balance and counters read from `accounts`.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct AccountRow {
    pub username: String,
    pub tier: String,
    pub balance_micros: i64,
    pub data_used_bytes: i64,
    pub data_limit_bytes: i64,
    pub pubsub_messages_sent: i64,
    pub pubsub_messages_limit: i64,
}

/// Full `uploads` row, used for both reads and upserts.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = uploads)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UploadRow {
    pub content_hash: String,
    pub network: String,
    pub kind: String,
    pub hold_months: i32,
    pub gc_deadline: DateTime<Utc>,
    pub uploaders: Vec<String>,
    pub encrypted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = upload_owners)]
pub(crate) struct NewUploadOwnerRow<'a> {
    pub content_hash: &'a str,
    pub network: &'a str,
    pub username: &'a str,
}

/// Claimed queue entry.
#[derive(Debug, Clone, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = pin_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct PinMessageRow {
    pub id: i64,
    pub body: Vec<u8>,
    pub delivery_count: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = pin_messages)]
pub(crate) struct NewPinMessageRow<'a> {
    pub body: &'a [u8],
}
