//! PostgreSQL-backed `UploadRepository`.
//!
//! `upsert_with` serialises writers per (hash, network) with a transaction
//! scoped advisory lock taken before the row is read. The lock covers the
//! first insert too, which a plain `SELECT … FOR UPDATE` cannot do while the
//! row is still missing.

use std::collections::BTreeSet;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::upsert::excluded;
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::{AsyncConnection as _, RunQueryDsl};

use crate::domain::ports::{
    OwnershipReservation, UploadMutation, UploadRepository, UploadRepositoryError,
};
use crate::domain::{
    ContentHash, NetworkName, UploadKind, UploadMergeError, UploadRecord, Username,
};

use super::diesel_helpers::map_diesel_error;
use super::models::{NewUploadOwnerRow, UploadRow};
use super::pool::{DbPool, PoolError};
use super::schema::{upload_owners, uploads};

const LOCK_RECORD_SQL: &str = "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))";

/// Diesel implementation of the [`UploadRepository`] port.
#[derive(Clone)]
pub struct DieselUploadRepository {
    pool: DbPool,
}

impl DieselUploadRepository {
    /// Create a repository backed by `pool`.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Failure inside the upsert transaction.
#[derive(Debug)]
enum UpsertError {
    Diesel(diesel::result::Error),
    Rejected(UploadMergeError),
    Corrupt(String),
}

impl From<diesel::result::Error> for UpsertError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Diesel(error)
    }
}

fn map_pool_error(error: PoolError) -> UploadRepositoryError {
    UploadRepositoryError::connection(error.into_message())
}

fn diesel_error(operation: &'static str) -> impl Fn(diesel::result::Error) -> UploadRepositoryError {
    move |error| {
        map_diesel_error(
            error,
            operation,
            UploadRepositoryError::query,
            UploadRepositoryError::connection,
        )
    }
}

fn map_upsert_error(error: UpsertError) -> UploadRepositoryError {
    match error {
        UpsertError::Diesel(error) => diesel_error("upsert upload")(error),
        UpsertError::Rejected(reason) => UploadRepositoryError::rejected(reason),
        UpsertError::Corrupt(message) => UploadRepositoryError::query(message),
    }
}

fn lock_key(hash: &ContentHash, network: &NetworkName) -> String {
    format!("uploads/{}/{}", network.as_ref(), hash.as_ref())
}

fn row_to_record(row: UploadRow) -> Result<UploadRecord, String> {
    let hash = ContentHash::new(row.content_hash).map_err(|err| err.to_string())?;
    let network = NetworkName::new(row.network).map_err(|err| err.to_string())?;
    let kind: UploadKind = row.kind.parse().map_err(|err| format!("{err}"))?;
    let hold_months = u32::try_from(row.hold_months)
        .map_err(|_| format!("hold_months is negative: {}", row.hold_months))?;
    let uploaders = row
        .uploaders
        .into_iter()
        .map(Username::new)
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(|err| err.to_string())?;
    Ok(UploadRecord {
        hash,
        network,
        kind,
        hold_months,
        gc_deadline: row.gc_deadline,
        uploaders,
        encrypted: row.encrypted,
        created_at: row.created_at,
    })
}

fn record_to_row(record: &UploadRecord) -> Result<UploadRow, String> {
    let hold_months = i32::try_from(record.hold_months)
        .map_err(|_| format!("hold_months exceeds INTEGER range: {}", record.hold_months))?;
    Ok(UploadRow {
        content_hash: record.hash.as_ref().to_owned(),
        network: record.network.as_ref().to_owned(),
        kind: record.kind.as_str().to_owned(),
        hold_months,
        gc_deadline: record.gc_deadline,
        uploaders: record
            .uploaders
            .iter()
            .map(|uploader| uploader.as_ref().to_owned())
            .collect(),
        encrypted: record.encrypted,
        created_at: record.created_at,
    })
}

#[async_trait]
impl UploadRepository for DieselUploadRepository {
    async fn find_owned(
        &self,
        username: &Username,
        hash: &ContentHash,
        network: &NetworkName,
    ) -> Result<Option<UploadRecord>, UploadRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row: Option<UploadRow> = uploads::table
            .filter(uploads::content_hash.eq(hash.as_ref()))
            .filter(uploads::network.eq(network.as_ref()))
            .select(UploadRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(diesel_error("find upload"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let record = row_to_record(row).map_err(UploadRepositoryError::query)?;
        Ok(record.is_owned_by(username).then_some(record))
    }

    async fn reserve_ownership(
        &self,
        username: &Username,
        hash: &ContentHash,
        network: &NetworkName,
    ) -> Result<OwnershipReservation, UploadRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let inserted = diesel::insert_into(upload_owners::table)
            .values(NewUploadOwnerRow {
                content_hash: hash.as_ref(),
                network: network.as_ref(),
                username: username.as_ref(),
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await
            .map_err(diesel_error("reserve ownership"))?;

        Ok(if inserted == 1 {
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
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::delete(
            upload_owners::table
                .filter(upload_owners::content_hash.eq(hash.as_ref()))
                .filter(upload_owners::network.eq(network.as_ref()))
                .filter(upload_owners::username.eq(username.as_ref())),
        )
        .execute(&mut conn)
        .await
        .map_err(diesel_error("release ownership"))?;
        Ok(())
    }

    async fn upsert_with(
        &self,
        hash: &ContentHash,
        network: &NetworkName,
        mutation: UploadMutation,
    ) -> Result<UploadRecord, UploadRepositoryError> {
        let key = lock_key(hash, network);
        let hash_value = hash.as_ref().to_owned();
        let network_value = network.as_ref().to_owned();
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction(|conn| {
            async move {
                diesel::sql_query(LOCK_RECORD_SQL)
                    .bind::<Text, _>(&key)
                    .execute(conn)
                    .await?;

                let current: Option<UploadRow> = uploads::table
                    .filter(uploads::content_hash.eq(&hash_value))
                    .filter(uploads::network.eq(&network_value))
                    .select(UploadRow::as_select())
                    .first(conn)
                    .await
                    .optional()?;
                let current = current
                    .map(row_to_record)
                    .transpose()
                    .map_err(UpsertError::Corrupt)?;

                let next = mutation(current).map_err(UpsertError::Rejected)?;
                let row = record_to_row(&next).map_err(UpsertError::Corrupt)?;

                diesel::insert_into(uploads::table)
                    .values(&row)
                    .on_conflict((uploads::content_hash, uploads::network))
                    .do_update()
                    .set((
                        uploads::kind.eq(excluded(uploads::kind)),
                        uploads::hold_months.eq(excluded(uploads::hold_months)),
                        uploads::gc_deadline.eq(excluded(uploads::gc_deadline)),
                        uploads::uploaders.eq(excluded(uploads::uploaders)),
                        uploads::encrypted.eq(excluded(uploads::encrypted)),
                        uploads::created_at.eq(excluded(uploads::created_at)),
                        uploads::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
                    .await?;

                let owners: Vec<NewUploadOwnerRow<'_>> = row
                    .uploaders
                    .iter()
                    .map(|username| NewUploadOwnerRow {
                        content_hash: row.content_hash.as_str(),
                        network: row.network.as_str(),
                        username: username.as_str(),
                    })
                    .collect();
                diesel::insert_into(upload_owners::table)
                    .values(&owners)
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await?;

                Ok::<_, UpsertError>(next)
            }
            .scope_boxed()
        })
        .await
        .map_err(map_upsert_error)
    }
}
