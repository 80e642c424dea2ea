use std::collections::HashMap;

use super::{AccountRef, Amount, Posting, Transaction};

/// Compute the balance for a single account from its transactions.
/// Balance = sum of credits - sum of debits
pub fn compute_balance(account: AccountRef, transactions: &[Transaction]) -> Amount {
    transactions
        .iter()
        .filter(|t| t.account == account)
        .map(Transaction::signed_amount)
        .sum()
}

/// Compute balances for every account that appears in the transactions.
pub fn compute_all_balances(transactions: &[Transaction]) -> HashMap<AccountRef, Amount> {
    let mut balances: HashMap<AccountRef, Amount> = HashMap::new();

    for transaction in transactions {
        *balances.entry(transaction.account).or_insert(0) += transaction.signed_amount();
    }

    balances
}

/// Net balance change per account if every posting were applied.
pub fn net_changes(postings: &[Posting]) -> HashMap<AccountRef, Amount> {
    let mut changes: HashMap<AccountRef, Amount> = HashMap::new();

    for posting in postings {
        *changes.entry(posting.account).or_insert(0) += posting.signed_amount();
    }

    changes
}

/// Validate the shape of a batch before it touches storage.
pub fn validate_batch(postings: &[Posting]) -> Result<(), BatchError> {
    if postings.is_empty() {
        return Err(BatchError::Empty);
    }

    for (index, posting) in postings.iter().enumerate() {
        if posting.amount <= 0 {
            return Err(BatchError::NonPositiveAmount {
                index,
                amount: posting.amount,
            });
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    Empty,
    NonPositiveAmount { index: usize, amount: Amount },
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::Empty => write!(f, "batch has no postings"),
            BatchError::NonPositiveAmount { index, amount } => {
                write!(f, "posting {} has non-positive amount {}", index, amount)
            }
        }
    }
}

impl std::error::Error for BatchError {}
