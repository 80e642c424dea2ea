// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::path::PathBuf;

use anyhow::Result;
use faucet_ledger::application::Ledger;
use faucet_ledger::config::LedgerConfig;
use faucet_ledger::domain::{AccountRef, Amount, Direction, RefType};
use tempfile::TempDir;

/// Helper to create a test ledger with a temporary database
pub async fn test_ledger() -> Result<(Ledger, TempDir)> {
    let temp_dir = TempDir::new()?;
    let ledger = Ledger::init(&config_for(&temp_dir)).await?;
    Ok((ledger, temp_dir))
}

pub fn db_path(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("test.db")
}

pub fn config_for(temp_dir: &TempDir) -> LedgerConfig {
    LedgerConfig::for_path(db_path(temp_dir))
}

/// A second, independent pool on the same file, standing in for another
/// worker process.
pub async fn another_process(temp_dir: &TempDir) -> Result<Ledger> {
    Ok(Ledger::connect(&config_for(temp_dir)).await?)
}

pub fn tag(s: &str) -> RefType {
    RefType::new(s).unwrap()
}

/// Open an account and credit it with an opening amount
pub async fn funded(ledger: &Ledger, account: AccountRef, amount: Amount) -> Result<AccountRef> {
    ledger.open_account(account).await?;
    if amount > 0 {
        ledger
            .post(faucet_ledger::domain::Posting::new(
                account,
                amount,
                Direction::Credit,
                tag(RefType::ADMIN_ADJUSTMENT),
            ))
            .await?;
    }
    Ok(account)
}

/// Open a user account with an opening balance
pub async fn funded_user(ledger: &Ledger, user_id: i64, amount: Amount) -> Result<AccountRef> {
    funded(ledger, AccountRef::user(user_id), amount).await
}
