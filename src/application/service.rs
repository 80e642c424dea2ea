use chrono::{DateTime, Utc};

use crate::config::LedgerConfig;
use crate::domain::{
    build_integrity_report, validate_batch, Account, AccountKind, AccountRef, Amount, BatchError,
    BatchId, Direction, IntegrityReport, Posting, RefType, ReferenceId, Transaction,
    TransactionId,
};
use crate::storage::{ApplyOutcome, Rejection, Repository};

use super::{build_reference_report, LedgerError, ReferenceReport};

/// The ledger service: sole owner of balance mutation.
/// Every client (web handlers, CLI, batch jobs) goes through this type.
pub struct Ledger {
    repo: Repository,
}

/// Result of applying a single posting
#[derive(Debug, Clone)]
pub struct Receipt {
    pub transaction: Transaction,
    /// Balance right after the posting committed
    pub balance: Amount,
    /// True when an earlier request with the same idempotency key was returned
    pub replayed: bool,
}

/// Result of applying a batch of postings
#[derive(Debug, Clone)]
pub struct BatchReceipt {
    pub batch_id: BatchId,
    pub transactions: Vec<Transaction>,
    pub replayed: bool,
}

impl BatchReceipt {
    /// Balance of an account after the last leg that touched it.
    pub fn balance_of(&self, account: AccountRef) -> Option<Amount> {
        self.transactions
            .iter()
            .rev()
            .find(|t| t.account == account)
            .map(|t| t.balance_after)
    }
}

/// Result of a paired transfer
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub batch_id: BatchId,
    pub debit: Transaction,
    pub credit: Transaction,
    pub replayed: bool,
}

/// Detailed account information
pub struct AccountInfo {
    pub account: Account,
    pub credit_count: i64,
    pub debit_count: i64,
}

/// Filter for querying transaction history
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub account: Option<AccountRef>,
    pub ref_type: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl TransactionFilter {
    pub fn for_account(account: AccountRef) -> Self {
        Self {
            account: Some(account),
            ..Default::default()
        }
    }
}

fn parse_ref_type(ref_type: &str) -> Result<RefType, LedgerError> {
    RefType::new(ref_type).map_err(|e| LedgerError::InvalidReference(e.to_string()))
}

/// Storage failures are logged once, here, before being surfaced.
fn persistence(err: anyhow::Error) -> LedgerError {
    tracing::error!(error = %format!("{:#}", err), "Ledger storage failure");
    LedgerError::Persistence(err)
}

impl Ledger {
    /// Create a new ledger with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Create (if needed) and migrate the configured database.
    pub async fn init(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let repo = Repository::init(config).await?;
        tracing::debug!(database_url = %config.database_url, "Ledger database initialized");
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let repo = Repository::connect(config, false).await?;
        repo.migrate().await?;
        Ok(Self::new(repo))
    }

    pub async fn close(&self) {
        self.repo.close().await;
    }

    // ========================
    // Account operations
    // ========================

    /// Open a new account with a zero balance.
    pub async fn open_account(&self, account: AccountRef) -> Result<Account, LedgerError> {
        let new_account = Account::new(account);
        if !self.repo.insert_account(&new_account).await? {
            return Err(LedgerError::AccountAlreadyExists(account));
        }
        tracing::info!(account = %account, "Account opened");
        Ok(new_account)
    }

    /// Open the account if it does not exist yet, then return it.
    pub async fn ensure_account(&self, account: AccountRef) -> Result<Account, LedgerError> {
        if self.repo.insert_account(&Account::new(account)).await? {
            tracing::info!(account = %account, "Account opened");
        }
        self.get_account(account).await
    }

    /// Get an account.
    pub async fn get_account(&self, account: AccountRef) -> Result<Account, LedgerError> {
        self.repo
            .get_account(account)
            .await?
            .ok_or(LedgerError::AccountNotFound(account))
    }

    /// Get detailed account information.
    pub async fn get_account_info(&self, account: AccountRef) -> Result<AccountInfo, LedgerError> {
        let account_row = self.get_account(account).await?;
        let (credit_count, debit_count) = self.repo.count_transactions_for_account(account).await?;

        Ok(AccountInfo {
            account: account_row,
            credit_count,
            debit_count,
        })
    }

    /// List accounts, optionally of a single kind.
    pub async fn list_accounts(
        &self,
        kind: Option<AccountKind>,
    ) -> Result<Vec<Account>, LedgerError> {
        Ok(self.repo.list_accounts(kind).await?)
    }

    /// Current balance of an account.
    pub async fn get_balance(&self, account: AccountRef) -> Result<Amount, LedgerError> {
        Ok(self.get_account(account).await?.balance)
    }

    /// True if the account currently holds at least `amount`.
    ///
    /// Advisory only: another request may spend the funds before the caller
    /// debits. The debit itself re-checks atomically.
    pub async fn check_balance(
        &self,
        account: AccountRef,
        amount: Amount,
    ) -> Result<bool, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        Ok(self.get_account(account).await?.covers(amount))
    }

    // ========================
    // Balance mutation
    // ========================

    /// Credit or debit a user account. Returns the new balance.
    pub async fn execute_transaction(
        &self,
        amount: Amount,
        direction: Direction,
        user_id: i64,
        ref_id: Option<ReferenceId>,
        ref_type: &str,
        comment: &str,
    ) -> Result<Amount, LedgerError> {
        self.execute_for(AccountRef::user(user_id), amount, direction, ref_id, ref_type, comment)
            .await
    }

    /// Credit or debit a guild bank. Returns the new balance.
    pub async fn execute_guild_transaction(
        &self,
        amount: Amount,
        direction: Direction,
        guild_id: i64,
        ref_id: Option<ReferenceId>,
        ref_type: &str,
        comment: &str,
    ) -> Result<Amount, LedgerError> {
        self.execute_for(AccountRef::guild(guild_id), amount, direction, ref_id, ref_type, comment)
            .await
    }

    /// Credit or debit a user's promotional-credit balance. Returns the new balance.
    pub async fn execute_credit_transaction(
        &self,
        amount: Amount,
        direction: Direction,
        user_id: i64,
        ref_id: Option<ReferenceId>,
        ref_type: &str,
        comment: &str,
    ) -> Result<Amount, LedgerError> {
        self.execute_for(AccountRef::credit(user_id), amount, direction, ref_id, ref_type, comment)
            .await
    }

    async fn execute_for(
        &self,
        account: AccountRef,
        amount: Amount,
        direction: Direction,
        ref_id: Option<ReferenceId>,
        ref_type: &str,
        comment: &str,
    ) -> Result<Amount, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut posting = Posting::new(account, amount, direction, parse_ref_type(ref_type)?)
            .with_comment(comment);
        if let Some(ref_id) = ref_id {
            posting = posting.with_ref_id(ref_id);
        }

        Ok(self.post(posting).await?.balance)
    }

    /// Apply a single posting.
    pub async fn post(&self, posting: Posting) -> Result<Receipt, LedgerError> {
        self.post_single(posting, None).await
    }

    /// Apply a single posting at most once per idempotency key.
    pub async fn post_idempotent(
        &self,
        posting: Posting,
        idempotency_key: &str,
    ) -> Result<Receipt, LedgerError> {
        self.post_single(posting, Some(idempotency_key)).await
    }

    async fn post_single(
        &self,
        posting: Posting,
        idempotency_key: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        let receipt = self.post_batch(vec![posting], idempotency_key).await?;
        let replayed = receipt.replayed;
        let transaction = receipt.transactions.into_iter().next().ok_or_else(|| {
            persistence(anyhow::anyhow!("batch {} has no transactions", receipt.batch_id))
        })?;

        Ok(Receipt {
            balance: transaction.balance_after,
            transaction,
            replayed,
        })
    }

    /// Apply every posting as one all-or-nothing unit, in the given order.
    ///
    /// With an idempotency key, a batch that already committed under that key
    /// is returned as-is (`replayed`), provided it describes the same postings.
    pub async fn post_batch(
        &self,
        postings: Vec<Posting>,
        idempotency_key: Option<&str>,
    ) -> Result<BatchReceipt, LedgerError> {
        validate_batch(&postings).map_err(|e| match e {
            BatchError::NonPositiveAmount { amount, .. } => LedgerError::InvalidAmount(amount),
            BatchError::Empty => LedgerError::InvalidTransfer(e.to_string()),
        })?;

        if let Some(key) = idempotency_key {
            if let Some(receipt) = self.replay(key, &postings).await? {
                return Ok(receipt);
            }
        }

        let outcome = self
            .repo
            .apply_batch(&postings, idempotency_key)
            .await
            .map_err(persistence)?;

        match outcome {
            ApplyOutcome::Applied {
                batch_id,
                transactions,
            } => {
                tracing::info!(
                    batch_id = %batch_id,
                    legs = transactions.len(),
                    idempotency_key = ?idempotency_key,
                    "Ledger batch committed"
                );
                Ok(BatchReceipt {
                    batch_id,
                    transactions,
                    replayed: false,
                })
            }
            ApplyOutcome::Rejected(Rejection::AccountNotFound(account)) => {
                tracing::warn!(account = %account, "Ledger batch rejected: account not found");
                Err(LedgerError::AccountNotFound(account))
            }
            ApplyOutcome::Rejected(Rejection::InsufficientFunds {
                account,
                balance,
                required,
            }) => {
                tracing::warn!(
                    account = %account,
                    balance,
                    required,
                    "Ledger batch rejected: insufficient funds"
                );
                Err(LedgerError::InsufficientFunds {
                    account,
                    balance,
                    required,
                })
            }
            ApplyOutcome::Rejected(Rejection::BalanceOverflow {
                account,
                balance,
                amount,
            }) => {
                tracing::warn!(
                    account = %account,
                    balance,
                    amount,
                    "Ledger batch rejected: balance overflow"
                );
                Err(LedgerError::BalanceOverflow {
                    account,
                    balance,
                    amount,
                })
            }
            ApplyOutcome::DuplicateKey => {
                // Lost the race against a concurrent request with the same key.
                let key = idempotency_key.ok_or_else(|| {
                    persistence(anyhow::anyhow!("duplicate batch reported without a key"))
                })?;
                self.replay(key, &postings).await?.ok_or_else(|| {
                    persistence(anyhow::anyhow!(
                        "batch for idempotency key '{}' not found after conflict",
                        key
                    ))
                })
            }
        }
    }

    async fn replay(
        &self,
        idempotency_key: &str,
        postings: &[Posting],
    ) -> Result<Option<BatchReceipt>, LedgerError> {
        let Some(batch_id) = self.repo.find_batch_by_key(idempotency_key).await? else {
            return Ok(None);
        };
        let transactions = self.repo.list_batch(batch_id).await?;

        let same_request = transactions.len() == postings.len()
            && postings.iter().zip(&transactions).all(|(p, t)| p.matches(t));
        if !same_request {
            tracing::warn!(idempotency_key, batch_id = %batch_id, "Idempotency key reused for a different request");
            return Err(LedgerError::IdempotencyConflict(idempotency_key.to_string()));
        }

        tracing::debug!(idempotency_key, batch_id = %batch_id, "Replaying committed batch");
        Ok(Some(BatchReceipt {
            batch_id,
            transactions,
            replayed: true,
        }))
    }

    /// Move coins between two accounts: debit `from`, credit `to`, atomically.
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer(
        &self,
        from: AccountRef,
        to: AccountRef,
        amount: Amount,
        ref_type: &str,
        ref_id: Option<ReferenceId>,
        comment: &str,
        idempotency_key: Option<&str>,
    ) -> Result<TransferReceipt, LedgerError> {
        if from == to {
            return Err(LedgerError::InvalidTransfer(format!(
                "cannot transfer from {} to itself",
                from
            )));
        }
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let ref_type = parse_ref_type(ref_type)?;
        let mut debit = Posting::debit(from, amount, ref_type.clone()).with_comment(comment);
        let mut credit = Posting::credit(to, amount, ref_type).with_comment(comment);
        if let Some(ref_id) = ref_id {
            debit = debit.with_ref_id(ref_id);
            credit = credit.with_ref_id(ref_id);
        }

        let receipt = self.post_batch(vec![debit, credit], idempotency_key).await?;
        let batch_id = receipt.batch_id;
        let replayed = receipt.replayed;
        let mut legs = receipt.transactions.into_iter();
        match (legs.next(), legs.next()) {
            (Some(debit), Some(credit)) => Ok(TransferReceipt {
                batch_id,
                debit,
                credit,
                replayed,
            }),
            _ => Err(persistence(anyhow::anyhow!(
                "transfer batch {} does not have two legs",
                batch_id
            ))),
        }
    }

    // ========================
    // History
    // ========================

    /// Get a transaction by ID.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.repo
            .get_transaction(id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    /// All legs committed in one batch.
    pub async fn get_batch(&self, batch_id: BatchId) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.repo.list_batch(batch_id).await?)
    }

    /// List transactions matching a filter, oldest first.
    pub async fn history(&self, filter: TransactionFilter) -> Result<Vec<Transaction>, LedgerError> {
        let ref_type = filter.ref_type.as_deref().map(parse_ref_type).transpose()?;

        Ok(self
            .repo
            .list_transactions_filtered(
                filter.account,
                ref_type.as_ref().map(RefType::as_str),
                filter.from_date,
                filter.to_date,
                filter.limit,
                filter.offset,
            )
            .await?)
    }

    /// Every transaction recorded against a business entity.
    pub async fn find_by_reference(
        &self,
        ref_type: &str,
        ref_id: ReferenceId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let ref_type = parse_ref_type(ref_type)?;
        Ok(self.repo.list_by_reference(&ref_type, ref_id).await?)
    }

    /// Every transaction in the ledger, in sequence order.
    pub async fn list_all_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.repo.list_transactions().await?)
    }

    // ========================
    // Audit and reporting
    // ========================

    /// Check that cached balances match the transaction log.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let stats = self.repo.get_integrity_stats().await?;
        let accounts = self.repo.list_accounts(None).await?;
        let computed = self.repo.compute_all_balances().await?;

        let report = build_integrity_report(&accounts, &computed, &stats);
        if !report.is_healthy() {
            tracing::warn!(issues = report.issues.len(), "Ledger integrity check failed");
        }

        Ok(report)
    }

    /// Credited and debited totals per reference type for one account.
    pub async fn reference_report(
        &self,
        account: AccountRef,
        from_date: Option<DateTime<Utc>>,
        to_date: Option<DateTime<Utc>>,
    ) -> Result<ReferenceReport, LedgerError> {
        self.get_account(account).await?;
        let aggregates = self
            .repo
            .sum_by_reference_type(account, from_date, to_date)
            .await?;

        Ok(build_reference_report(account, from_date, to_date, aggregates))
    }
}
