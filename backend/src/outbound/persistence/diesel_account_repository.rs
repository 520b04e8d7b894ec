//! PostgreSQL-backed credit ledger and usage meter.
//!
//! Every balance or counter change is one conditional `UPDATE … RETURNING`,
//! so the check and the write cannot be split by a concurrent request. When
//! the condition filters the row out, a follow-up read decides between
//! "account missing" and "limit reached".

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::domain::ports::{CreditLedger, CreditLedgerError, UsageMeter, UsageMeterError};
use crate::domain::{AccountUsage, AccountValidationError, Credits, Tier, Username};

use super::diesel_helpers::{column_to_u64, map_diesel_error, u64_to_column};
use super::models::AccountRow;
use super::pool::{DbPool, PoolError};
use super::schema::accounts;

const REDUCE_USAGE_SQL: &str = "UPDATE accounts \
     SET data_used_bytes = GREATEST(data_used_bytes - $1, 0), updated_at = NOW() \
     WHERE username = $2";

/// Diesel implementation of [`CreditLedger`] and [`UsageMeter`] over the
/// `accounts` table.
#[derive(Clone)]
pub struct DieselAccountRepository {
    pool: DbPool,
}

impl DieselAccountRepository {
    /// Create a repository backed by `pool`.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn load(
    conn: &mut AsyncPgConnection,
    username: &Username,
) -> Result<Option<AccountRow>, diesel::result::Error> {
    accounts::table
        .filter(accounts::username.eq(username.as_ref()))
        .select(AccountRow::as_select())
        .first(conn)
        .await
        .optional()
}

fn ledger_pool_error(error: PoolError) -> CreditLedgerError {
    CreditLedgerError::connection(error.into_message())
}

fn ledger_diesel_error(operation: &'static str) -> impl Fn(diesel::result::Error) -> CreditLedgerError {
    move |error| {
        map_diesel_error(
            error,
            operation,
            CreditLedgerError::query,
            CreditLedgerError::connection,
        )
    }
}

fn meter_pool_error(error: PoolError) -> UsageMeterError {
    UsageMeterError::connection(error.into_message())
}

fn meter_diesel_error(operation: &'static str) -> impl Fn(diesel::result::Error) -> UsageMeterError {
    move |error| {
        map_diesel_error(
            error,
            operation,
            UsageMeterError::query,
            UsageMeterError::connection,
        )
    }
}

fn row_balance(micros: i64) -> Result<Credits, CreditLedgerError> {
    Credits::from_micros(micros)
        .map_err(|err| CreditLedgerError::query(format!("stored balance invalid: {err}")))
}

fn row_to_usage(row: AccountRow) -> Result<AccountUsage, UsageMeterError> {
    let username = Username::new(row.username).map_err(|err| UsageMeterError::query(err.to_string()))?;
    let tier: Tier = row
        .tier
        .parse()
        .map_err(|err: AccountValidationError| UsageMeterError::query(err.to_string()))?;
    Ok(AccountUsage {
        username,
        tier,
        data_used_bytes: column_to_u64("data_used_bytes", row.data_used_bytes)
            .map_err(UsageMeterError::query)?,
        data_limit_bytes: column_to_u64("data_limit_bytes", row.data_limit_bytes)
            .map_err(UsageMeterError::query)?,
        pubsub_messages_sent: column_to_u64("pubsub_messages_sent", row.pubsub_messages_sent)
            .map_err(UsageMeterError::query)?,
        pubsub_messages_limit: column_to_u64("pubsub_messages_limit", row.pubsub_messages_limit)
            .map_err(UsageMeterError::query)?,
    })
}

async fn load_usage(
    conn: &mut AsyncPgConnection,
    username: &Username,
) -> Result<AccountUsage, UsageMeterError> {
    let row = load(conn, username)
        .await
        .map_err(meter_diesel_error("load usage"))?
        .ok_or_else(|| UsageMeterError::account_not_found(username.as_ref()))?;
    row_to_usage(row)
}

fn cap_exceeded(usage: &AccountUsage, requested: u64) -> UsageMeterError {
    UsageMeterError::cap_exceeded(usage.data_used_bytes, usage.data_limit_bytes, requested)
}

fn pubsub_cap_exceeded(usage: &AccountUsage, requested: u64) -> UsageMeterError {
    UsageMeterError::pub_sub_cap_exceeded(
        usage.pubsub_messages_sent,
        usage.pubsub_messages_limit,
        requested,
    )
}

#[async_trait]
impl CreditLedger for DieselAccountRepository {
    async fn balance(&self, username: &Username) -> Result<Credits, CreditLedgerError> {
        let mut conn = self.pool.get().await.map_err(ledger_pool_error)?;
        let row = load(&mut conn, username)
            .await
            .map_err(ledger_diesel_error("load balance"))?
            .ok_or_else(|| CreditLedgerError::account_not_found(username.as_ref()))?;
        row_balance(row.balance_micros)
    }

    async fn debit(
        &self,
        username: &Username,
        amount: Credits,
    ) -> Result<Credits, CreditLedgerError> {
        let micros = amount.as_micros();
        let mut conn = self.pool.get().await.map_err(ledger_pool_error)?;
        let updated: Option<i64> = diesel::update(
            accounts::table
                .filter(accounts::username.eq(username.as_ref()))
                .filter(accounts::balance_micros.ge(micros)),
        )
        .set((
            accounts::balance_micros.eq(accounts::balance_micros - micros),
            accounts::updated_at.eq(diesel::dsl::now),
        ))
        .returning(accounts::balance_micros)
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(ledger_diesel_error("debit"))?;

        if let Some(balance) = updated {
            return row_balance(balance);
        }
        let row = load(&mut conn, username)
            .await
            .map_err(ledger_diesel_error("load balance"))?
            .ok_or_else(|| CreditLedgerError::account_not_found(username.as_ref()))?;
        Err(CreditLedgerError::insufficient_balance(
            row_balance(row.balance_micros)?,
            amount,
        ))
    }

    async fn credit(
        &self,
        username: &Username,
        amount: Credits,
    ) -> Result<Credits, CreditLedgerError> {
        let micros = amount.as_micros();
        let mut conn = self.pool.get().await.map_err(ledger_pool_error)?;
        let updated: Option<i64> =
            diesel::update(accounts::table.filter(accounts::username.eq(username.as_ref())))
                .set((
                    accounts::balance_micros.eq(accounts::balance_micros + micros),
                    accounts::updated_at.eq(diesel::dsl::now),
                ))
                .returning(accounts::balance_micros)
                .get_result(&mut conn)
                .await
                .optional()
                .map_err(ledger_diesel_error("credit"))?;

        let balance =
            updated.ok_or_else(|| CreditLedgerError::account_not_found(username.as_ref()))?;
        row_balance(balance)
    }
}

#[async_trait]
impl UsageMeter for DieselAccountRepository {
    async fn find_usage(&self, username: &Username) -> Result<AccountUsage, UsageMeterError> {
        let mut conn = self.pool.get().await.map_err(meter_pool_error)?;
        load_usage(&mut conn, username).await
    }

    async fn can_upload(
        &self,
        username: &Username,
        additional_bytes: u64,
    ) -> Result<(), UsageMeterError> {
        let usage = self.find_usage(username).await?;
        if usage.can_store(additional_bytes) {
            Ok(())
        } else {
            Err(cap_exceeded(&usage, additional_bytes))
        }
    }

    async fn update_usage(&self, username: &Username, bytes: u64) -> Result<(), UsageMeterError> {
        let delta = u64_to_column("data_used_bytes", bytes).map_err(UsageMeterError::query)?;
        let mut conn = self.pool.get().await.map_err(meter_pool_error)?;
        let updated = diesel::update(
            accounts::table
                .filter(accounts::username.eq(username.as_ref()))
                .filter((accounts::data_used_bytes + delta).le(accounts::data_limit_bytes)),
        )
        .set((
            accounts::data_used_bytes.eq(accounts::data_used_bytes + delta),
            accounts::updated_at.eq(diesel::dsl::now),
        ))
        .execute(&mut conn)
        .await
        .map_err(meter_diesel_error("update usage"))?;

        if updated == 1 {
            return Ok(());
        }
        let usage = load_usage(&mut conn, username).await?;
        Err(cap_exceeded(&usage, bytes))
    }

    async fn reduce_usage(&self, username: &Username, bytes: u64) -> Result<(), UsageMeterError> {
        let delta = u64_to_column("data_used_bytes", bytes).map_err(UsageMeterError::query)?;
        let mut conn = self.pool.get().await.map_err(meter_pool_error)?;
        let updated = diesel::sql_query(REDUCE_USAGE_SQL)
            .bind::<BigInt, _>(delta)
            .bind::<Text, _>(username.as_ref())
            .execute(&mut conn)
            .await
            .map_err(meter_diesel_error("reduce usage"))?;

        if updated == 0 {
            return Err(UsageMeterError::account_not_found(username.as_ref()));
        }
        Ok(())
    }

    async fn can_publish_pubsub(
        &self,
        username: &Username,
        messages: u64,
    ) -> Result<(), UsageMeterError> {
        let usage = self.find_usage(username).await?;
        if usage.can_publish_pubsub(messages) {
            Ok(())
        } else {
            Err(pubsub_cap_exceeded(&usage, messages))
        }
    }

    async fn increment_pubsub_usage(
        &self,
        username: &Username,
        messages: u64,
    ) -> Result<(), UsageMeterError> {
        let delta =
            u64_to_column("pubsub_messages_sent", messages).map_err(UsageMeterError::query)?;
        let mut conn = self.pool.get().await.map_err(meter_pool_error)?;
        let updated = diesel::update(
            accounts::table
                .filter(accounts::username.eq(username.as_ref()))
                .filter(
                    (accounts::pubsub_messages_sent + delta).le(accounts::pubsub_messages_limit),
                ),
        )
        .set((
            accounts::pubsub_messages_sent.eq(accounts::pubsub_messages_sent + delta),
            accounts::updated_at.eq(diesel::dsl::now),
        ))
        .execute(&mut conn)
        .await
        .map_err(meter_diesel_error("increment pubsub usage"))?;

        if updated == 1 {
            return Ok(());
        }
        let usage = load_usage(&mut conn, username).await?;
        Err(pubsub_cap_exceeded(&usage, messages))
    }
}
