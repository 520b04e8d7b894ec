use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::ports::{CreditLedger, CreditLedgerError, UsageMeter, UsageMeterError};
use crate::domain::{AccountUsage, Credits, Tier, Username};

use super::{FailureBudget, lock};

#[derive(Debug, Clone)]
struct AccountState {
    balance: Credits,
    usage: AccountUsage,
}

/// Credit ledger and usage meter over one shared map of accounts.
///
/// Every mutation happens under a single lock, so check-and-update is atomic
/// exactly like the conditional `UPDATE` statements of the database adapter.
#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    accounts: Mutex<HashMap<Username, AccountState>>,
    debit_failures: FailureBudget,
    credit_failures: FailureBudget,
    update_usage_failures: FailureBudget,
    reduce_usage_failures: FailureBudget,
}

impl InMemoryAccounts {
    /// Register an account.
    pub fn insert(&self, username: &Username, tier: Tier, balance: Credits, limit_bytes: u64) {
        let usage = AccountUsage {
            username: username.clone(),
            tier,
            data_used_bytes: 0,
            data_limit_bytes: limit_bytes,
            pubsub_messages_sent: 0,
            pubsub_messages_limit: 0,
        };
        lock(&self.accounts).insert(username.clone(), AccountState { balance, usage });
    }

    /// Overwrite the used-bytes counter.
    pub fn set_used_bytes(&self, username: &Username, used: u64) {
        if let Some(state) = lock(&self.accounts).get_mut(username) {
            state.usage.data_used_bytes = used;
        }
    }

    /// Overwrite the monthly pub/sub message cap.
    pub fn set_pubsub_limit(&self, username: &Username, limit: u64) {
        if let Some(state) = lock(&self.accounts).get_mut(username) {
            state.usage.pubsub_messages_limit = limit;
        }
    }

    pub fn pubsub_sent_of(&self, username: &Username) -> Option<u64> {
        lock(&self.accounts)
            .get(username)
            .map(|state| state.usage.pubsub_messages_sent)
    }

    pub fn balance_of(&self, username: &Username) -> Option<Credits> {
        lock(&self.accounts).get(username).map(|state| state.balance)
    }

    pub fn used_bytes_of(&self, username: &Username) -> Option<u64> {
        lock(&self.accounts)
            .get(username)
            .map(|state| state.usage.data_used_bytes)
    }

    /// Fail the next `count` debits with a query error.
    pub fn fail_debits(&self, count: u32) {
        self.debit_failures.set(count);
    }

    /// Fail the next `count` credits with a query error.
    pub fn fail_credits(&self, count: u32) {
        self.credit_failures.set(count);
    }

    /// Fail the next `count` usage commits with a query error.
    pub fn fail_usage_updates(&self, count: u32) {
        self.update_usage_failures.set(count);
    }

    /// Fail the next `count` usage reductions with a query error.
    pub fn fail_usage_reductions(&self, count: u32) {
        self.reduce_usage_failures.set(count);
    }
}

fn ledger_missing(username: &Username) -> CreditLedgerError {
    CreditLedgerError::account_not_found(username.as_ref())
}

fn meter_missing(username: &Username) -> UsageMeterError {
    UsageMeterError::account_not_found(username.as_ref())
}

fn cap_check(usage: &AccountUsage, requested: u64) -> Result<(), UsageMeterError> {
    if usage.can_store(requested) {
        return Ok(());
    }
    Err(UsageMeterError::cap_exceeded(
        usage.data_used_bytes,
        usage.data_limit_bytes,
        requested,
    ))
}

fn pubsub_cap_check(usage: &AccountUsage, requested: u64) -> Result<(), UsageMeterError> {
    if usage.can_publish_pubsub(requested) {
        return Ok(());
    }
    Err(UsageMeterError::pub_sub_cap_exceeded(
        usage.pubsub_messages_sent,
        usage.pubsub_messages_limit,
        requested,
    ))
}

#[async_trait]
impl CreditLedger for InMemoryAccounts {
    async fn balance(&self, username: &Username) -> Result<Credits, CreditLedgerError> {
        self.balance_of(username)
            .ok_or_else(|| ledger_missing(username))
    }

    async fn debit(&self, username: &Username, amount: Credits) -> Result<Credits, CreditLedgerError> {
        if self.debit_failures.take() {
            return Err(CreditLedgerError::query("injected debit failure"));
        }
        let mut accounts = lock(&self.accounts);
        let state = accounts
            .get_mut(username)
            .ok_or_else(|| ledger_missing(username))?;
        let next = state.balance.checked_sub(amount).ok_or_else(|| {
            CreditLedgerError::insufficient_balance(state.balance, amount)
        })?;
        state.balance = next;
        Ok(next)
    }

    async fn credit(&self, username: &Username, amount: Credits) -> Result<Credits, CreditLedgerError> {
        if self.credit_failures.take() {
            return Err(CreditLedgerError::query("injected credit failure"));
        }
        let mut accounts = lock(&self.accounts);
        let state = accounts
            .get_mut(username)
            .ok_or_else(|| ledger_missing(username))?;
        let next = state
            .balance
            .checked_add(amount)
            .ok_or_else(|| CreditLedgerError::query("balance overflow"))?;
        state.balance = next;
        Ok(next)
    }
}

#[async_trait]
impl UsageMeter for InMemoryAccounts {
    async fn find_usage(&self, username: &Username) -> Result<AccountUsage, UsageMeterError> {
        lock(&self.accounts)
            .get(username)
            .map(|state| state.usage.clone())
            .ok_or_else(|| meter_missing(username))
    }

    async fn can_upload(&self, username: &Username, additional_bytes: u64) -> Result<(), UsageMeterError> {
        let accounts = lock(&self.accounts);
        let state = accounts.get(username).ok_or_else(|| meter_missing(username))?;
        cap_check(&state.usage, additional_bytes)
    }

    async fn update_usage(&self, username: &Username, bytes: u64) -> Result<(), UsageMeterError> {
        if self.update_usage_failures.take() {
            return Err(UsageMeterError::query("injected usage update failure"));
        }
        let mut accounts = lock(&self.accounts);
        let state = accounts
            .get_mut(username)
            .ok_or_else(|| meter_missing(username))?;
        cap_check(&state.usage, bytes)?;
        state.usage.data_used_bytes += bytes;
        Ok(())
    }

    async fn reduce_usage(&self, username: &Username, bytes: u64) -> Result<(), UsageMeterError> {
        if self.reduce_usage_failures.take() {
            return Err(UsageMeterError::query("injected usage reduction failure"));
        }
        let mut accounts = lock(&self.accounts);
        let state = accounts
            .get_mut(username)
            .ok_or_else(|| meter_missing(username))?;
        state.usage.data_used_bytes = state.usage.data_used_bytes.saturating_sub(bytes);
        Ok(())
    }

    async fn can_publish_pubsub(&self, username: &Username, messages: u64) -> Result<(), UsageMeterError> {
        let accounts = lock(&self.accounts);
        let state = accounts.get(username).ok_or_else(|| meter_missing(username))?;
        pubsub_cap_check(&state.usage, messages)
    }

    async fn increment_pubsub_usage(&self, username: &Username, messages: u64) -> Result<(), UsageMeterError> {
        let mut accounts = lock(&self.accounts);
        let state = accounts
            .get_mut(username)
            .ok_or_else(|| meter_missing(username))?;
        pubsub_cap_check(&state.usage, messages)?;
        state.usage.pubsub_messages_sent += messages;
        Ok(())
    }
}
