use thiserror::Error;

use crate::domain::{AccountRef, Amount};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0} (must be positive)")]
    InvalidAmount(Amount),

    #[error("Invalid reference type: {0}")]
    InvalidReference(String),

    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountRef),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(AccountRef),

    #[error("Insufficient funds in account {account}: balance {balance}, required {required}")]
    InsufficientFunds {
        account: AccountRef,
        balance: Amount,
        required: Amount,
    },

    #[error("Balance overflow in account {account}: balance {balance}, credit {amount}")]
    BalanceOverflow {
        account: AccountRef,
        balance: Amount,
        amount: Amount,
    },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Idempotency key '{0}' was already used for a different request")]
    IdempotencyConflict(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl LedgerError {
    /// Expected conditions a caller reports back to the end user.
    /// Everything else is an internal failure.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, LedgerError::Persistence(_))
    }
}
