//! Port for the prepaid credit balance.
//!
//! Adapters must apply debits and credits as relative adjustments in a single
//! atomic statement so concurrent requests for the same account can never
//! spend the same credits twice.

use async_trait::async_trait;

use crate::domain::{Credits, Username};

use super::define_port_error;

define_port_error! {
    /// Errors raised by credit ledger adapters.
    pub enum CreditLedgerError {
        /// The debit would take the balance below zero.
        InsufficientBalance { balance: Credits, requested: Credits } =>
            "insufficient balance: {balance} available, {requested} requested",
        /// No account exists for the username.
        AccountNotFound { username: String } => "account not found: {username}",
        /// Ledger connection could not be established.
        Connection { message: String } => "credit ledger connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "credit ledger query failed: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Current balance of the account.
    async fn balance(&self, username: &Username) -> Result<Credits, CreditLedgerError>;

    /// Atomically subtract `amount`, returning the new balance.
    ///
    /// Fails with [`CreditLedgerError::InsufficientBalance`] without changing
    /// the balance when `amount` exceeds it.
    async fn debit(&self, username: &Username, amount: Credits)
    -> Result<Credits, CreditLedgerError>;

    /// Atomically add `amount`, returning the new balance.
    async fn credit(
        &self,
        username: &Username,
        amount: Credits,
    ) -> Result<Credits, CreditLedgerError>;
}
