use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::{Ledger, TransactionFilter};
use crate::domain::{format_amount, Account, AccountRef, Transaction};

/// Full ledger snapshot for audits and offline analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
}

/// Exporter for converting ledger data to various formats
pub struct Exporter<'a> {
    ledger: &'a Ledger,
}

impl<'a> Exporter<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Export one account's statement to CSV, oldest entry first.
    pub async fn export_statement_csv<W: Write>(
        &self,
        account: AccountRef,
        writer: W,
    ) -> Result<usize> {
        self.ledger.get_account(account).await?;
        let transactions = self
            .ledger
            .history(TransactionFilter::for_account(account))
            .await?;

        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record([
            "sequence",
            "created_at",
            "transaction_id",
            "direction",
            "amount",
            "balance_after",
            "ref_type",
            "ref_id",
            "comment",
        ])?;

        for transaction in &transactions {
            csv_writer.write_record([
                transaction.sequence.to_string(),
                transaction.created_at.to_rfc3339(),
                transaction.id.to_string(),
                transaction.direction.to_string(),
                format_amount(transaction.amount),
                format_amount(transaction.balance_after),
                transaction.ref_type.to_string(),
                transaction.ref_id.map(|id| id.to_string()).unwrap_or_default(),
                transaction.comment.clone(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(transactions.len())
    }

    /// Export account balances to CSV.
    pub async fn export_balances_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let accounts = self.ledger.list_accounts(None).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(["kind", "account_id", "balance", "updated_at"])?;

        for account in &accounts {
            csv_writer.write_record([
                account.kind.as_str().to_string(),
                account.id.to_string(),
                format_amount(account.balance),
                account.updated_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(accounts.len())
    }

    /// Export the whole ledger as a JSON snapshot.
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<LedgerSnapshot> {
        let accounts = self.ledger.list_accounts(None).await?;
        let transactions = self.ledger.list_all_transactions().await?;

        let snapshot = LedgerSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            accounts,
            transactions,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
