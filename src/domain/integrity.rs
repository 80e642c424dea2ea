use std::collections::HashMap;

use serde::Serialize;

use super::{Account, AccountKind, AccountRef, Amount};

/// A cached balance that disagrees with the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceDrift {
    pub account: AccountRef,
    pub cached: Amount,
    pub computed: Amount,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub account_count: i64,
    pub transaction_count: i64,
    pub balance_by_kind: HashMap<AccountKind, Amount>,
    pub drifts: Vec<BalanceDrift>,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Raw counters gathered by the repository.
#[derive(Debug, Clone, Default)]
pub struct IntegrityStats {
    pub account_count: i64,
    pub transaction_count: i64,
    pub has_sequence_gaps: bool,
    pub orphan_transactions: i64,
    pub invalid_amounts: i64,
}

/// Compare cached balances against the balances computed from transactions.
pub fn build_integrity_report(
    accounts: &[Account],
    computed: &HashMap<AccountRef, Amount>,
    stats: &IntegrityStats,
) -> IntegrityReport {
    let mut balance_by_kind: HashMap<AccountKind, Amount> = HashMap::new();
    let mut drifts = Vec::new();
    let mut issues = Vec::new();

    for account in accounts {
        *balance_by_kind.entry(account.kind).or_insert(0) += account.balance;

        let key = account.account_ref();
        let expected = computed.get(&key).copied().unwrap_or(0);
        if expected != account.balance {
            drifts.push(BalanceDrift {
                account: key,
                cached: account.balance,
                computed: expected,
            });
        }
        if account.balance < 0 {
            issues.push(format!("Account {} has negative balance {}", key, account.balance));
        }
    }

    drifts.sort_by_key(|d| d.account);
    for drift in &drifts {
        issues.push(format!(
            "Account {} caches balance {} but its transactions sum to {}",
            drift.account, drift.cached, drift.computed
        ));
    }

    if stats.has_sequence_gaps {
        issues.push("Transaction sequence has gaps".to_string());
    }
    if stats.orphan_transactions > 0 {
        issues.push(format!(
            "{} transaction(s) reference missing accounts",
            stats.orphan_transactions
        ));
    }
    if stats.invalid_amounts > 0 {
        issues.push(format!(
            "{} transaction(s) have non-positive amounts",
            stats.invalid_amounts
        ));
    }

    IntegrityReport {
        account_count: stats.account_count,
        transaction_count: stats.transaction_count,
        balance_by_kind,
        drifts,
        issues,
    }
}
