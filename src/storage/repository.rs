use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::application::ReferenceAggregate;
use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountKind, AccountRef, Amount, BatchId, Direction, IntegrityStats, Posting,
    RefType, ReferenceId, Transaction, TransactionId,
};

use super::MIGRATION_001_INITIAL;

const TRANSACTION_COLUMNS: &str = "id, sequence, batch_id, account_kind, account_id, amount, direction, balance_after, ref_id, ref_type, comment, created_at";

/// Why a batch was not applied. The database transaction has been rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    AccountNotFound(AccountRef),
    InsufficientFunds {
        account: AccountRef,
        balance: Amount,
        required: Amount,
    },
    /// The credit would push the balance past `Amount::MAX`.
    BalanceOverflow {
        account: AccountRef,
        balance: Amount,
        amount: Amount,
    },
}

/// Result of applying a batch of postings.
#[derive(Debug)]
pub enum ApplyOutcome {
    Applied {
        batch_id: BatchId,
        transactions: Vec<Transaction>,
    },
    Rejected(Rejection),
    /// Another batch already committed under the same idempotency key.
    DuplicateKey,
}

/// Repository for persisting and querying accounts and ledger transactions.
pub struct Repository {
    pool: SqlitePool,
}

/// Fixed-width UTC timestamps so that text comparison orders chronologically.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str, what: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid {} timestamp", what))?
        .with_timezone(&Utc))
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for the configured database.
    /// WAL mode plus a busy timeout lets separate processes share the file.
    pub async fn connect(config: &LedgerConfig, create_if_missing: bool) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| format!("Invalid database URL: {}", config.database_url))?
            .create_if_missing(create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    /// Run database migrations. Safe to run repeatedly.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(config: &LedgerConfig) -> Result<Self> {
        let repo = Self::connect(config, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ========================
    // Account operations
    // ========================

    /// Insert a new account. Returns false if it already exists.
    pub async fn insert_account(&self, account: &Account) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (kind, account_id, balance, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (kind, account_id) DO NOTHING
            "#,
        )
        .bind(account.kind.as_str())
        .bind(account.id)
        .bind(account.balance)
        .bind(account.version)
        .bind(timestamp(account.created_at))
        .bind(timestamp(account.updated_at))
        .execute(&self.pool)
        .await
        .context("Failed to save account")?;

        Ok(result.rows_affected() == 1)
    }

    /// Get an account by its reference.
    pub async fn get_account(&self, account: AccountRef) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT kind, account_id, balance, version, created_at, updated_at
            FROM accounts
            WHERE kind = ? AND account_id = ?
            "#,
        )
        .bind(account.kind.as_str())
        .bind(account.id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// List accounts, optionally restricted to one kind.
    pub async fn list_accounts(&self, kind: Option<AccountKind>) -> Result<Vec<Account>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    "SELECT kind, account_id, balance, version, created_at, updated_at FROM accounts WHERE kind = ? ORDER BY account_id",
                )
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT kind, account_id, balance, version, created_at, updated_at FROM accounts ORDER BY kind, account_id",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let kind_str: String = row.get("kind");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(Account {
            kind: AccountKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account kind: {}", kind_str))?,
            id: row.get("account_id"),
            balance: row.get("balance"),
            version: row.get("version"),
            created_at: parse_timestamp(&created_at_str, "created_at")?,
            updated_at: parse_timestamp(&updated_at_str, "updated_at")?,
        })
    }

    // ========================
    // Batch operations
    // ========================

    /// Apply every posting in one database transaction.
    ///
    /// The batch row is written first so the SQLite write lock is held before
    /// any balance is read. Each balance update is guarded by
    /// `balance + delta >= 0`, so concurrent writers in other processes can
    /// never produce a lost update or a negative balance. A credit that would
    /// overflow the balance is rejected before the update runs. The first
    /// rejected leg rolls back the whole batch.
    pub async fn apply_batch(
        &self,
        postings: &[Posting],
        idempotency_key: Option<&str>,
    ) -> Result<ApplyOutcome> {
        let batch_id = Uuid::new_v4();
        // Stored timestamps carry microseconds; keep the returned rows identical.
        let now = Utc::now().trunc_subsecs(6);
        let now_str = timestamp(now);

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin database transaction")?;

        let inserted = sqlx::query(
            "INSERT INTO batches (id, idempotency_key, leg_count, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(batch_id.to_string())
        .bind(idempotency_key)
        .bind(postings.len() as i64)
        .bind(&now_str)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tx.rollback().await.context("Failed to roll back batch")?;
                return Ok(ApplyOutcome::DuplicateKey);
            }
            Err(e) => return Err(anyhow::Error::new(e).context("Failed to record batch")),
        }

        let mut transactions = Vec::with_capacity(postings.len());
        for posting in postings {
            let delta = posting.signed_amount();

            let rejection = match Self::read_balance(&mut *tx, posting.account).await? {
                None => Some(Rejection::AccountNotFound(posting.account)),
                Some(balance) => match balance.checked_add(delta) {
                    None => Some(Rejection::BalanceOverflow {
                        account: posting.account,
                        balance,
                        amount: posting.amount,
                    }),
                    Some(next) if next < 0 => Some(Rejection::InsufficientFunds {
                        account: posting.account,
                        balance,
                        required: posting.amount,
                    }),
                    Some(_) => None,
                },
            };
            if let Some(rejection) = rejection {
                tx.rollback().await.context("Failed to roll back batch")?;
                return Ok(ApplyOutcome::Rejected(rejection));
            }

            let row = sqlx::query(
                r#"
                UPDATE accounts
                SET balance = balance + ?, version = version + 1, updated_at = ?
                WHERE kind = ? AND account_id = ? AND balance + ? >= 0
                RETURNING balance
                "#,
            )
            .bind(delta)
            .bind(&now_str)
            .bind(posting.account.kind.as_str())
            .bind(posting.account.id)
            .bind(delta)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to update account balance")?;

            let balance_after: Amount = match row {
                Some(row) => row
                    .try_get("balance")
                    .context("Failed to read updated balance")?,
                None => {
                    let current = Self::read_balance(&mut *tx, posting.account).await?;
                    tx.rollback().await.context("Failed to roll back batch")?;
                    let rejection = match current {
                        None => Rejection::AccountNotFound(posting.account),
                        Some(balance) => Rejection::InsufficientFunds {
                            account: posting.account,
                            balance,
                            required: posting.amount,
                        },
                    };
                    return Ok(ApplyOutcome::Rejected(rejection));
                }
            };

            let mut transaction = Transaction::from_posting(posting, batch_id);
            transaction.sequence = Self::next_sequence(&mut *tx).await?;
            transaction.balance_after = balance_after;
            transaction.created_at = now;

            Self::insert_transaction(&mut *tx, &transaction).await?;
            transactions.push(transaction);
        }

        tx.commit()
            .await
            .context("Failed to commit database transaction")?;

        Ok(ApplyOutcome::Applied {
            batch_id,
            transactions,
        })
    }

    async fn read_balance(conn: &mut SqliteConnection, account: AccountRef) -> Result<Option<Amount>> {
        sqlx::query_scalar::<_, Amount>("SELECT balance FROM accounts WHERE kind = ? AND account_id = ?")
            .bind(account.kind.as_str())
            .bind(account.id)
            .fetch_optional(conn)
            .await
            .context("Failed to read account balance")
    }

    /// Get the next sequence number and increment the counter.
    async fn next_sequence(conn: &mut SqliteConnection) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(conn)
        .await
        .context("Failed to get next sequence number")?;

        Ok(row.get("value"))
    }

    async fn insert_transaction(conn: &mut SqliteConnection, transaction: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, sequence, batch_id, account_kind, account_id, amount, direction, balance_after, ref_id, ref_type, comment, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.id.to_string())
        .bind(transaction.sequence)
        .bind(transaction.batch_id.to_string())
        .bind(transaction.account.kind.as_str())
        .bind(transaction.account.id)
        .bind(transaction.amount)
        .bind(transaction.direction.as_str())
        .bind(transaction.balance_after)
        .bind(transaction.ref_id)
        .bind(transaction.ref_type.as_str())
        .bind(&transaction.comment)
        .bind(timestamp(transaction.created_at))
        .execute(conn)
        .await
        .context("Failed to save transaction")?;

        Ok(())
    }

    /// Find the batch committed under an idempotency key.
    pub async fn find_batch_by_key(&self, idempotency_key: &str) -> Result<Option<BatchId>> {
        let id: Option<String> =
            sqlx::query_scalar::<_, String>("SELECT id FROM batches WHERE idempotency_key = ?")
                .bind(idempotency_key)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to look up idempotency key")?;

        id.map(|s| Uuid::parse_str(&s).context("Invalid batch ID"))
            .transpose()
    }

    // ========================
    // Transaction queries
    // ========================

    /// Get a transaction by ID.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let query = format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch transaction")?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    /// All legs of one batch, in application order.
    pub async fn list_batch(&self, batch_id: BatchId) -> Result<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions WHERE batch_id = ? ORDER BY sequence",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(batch_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list batch transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Every transaction recorded against a business entity.
    pub async fn list_by_reference(
        &self,
        ref_type: &RefType,
        ref_id: ReferenceId,
    ) -> Result<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions WHERE ref_type = ? AND ref_id = ? ORDER BY sequence",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(ref_type.as_str())
            .bind(ref_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions by reference")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// List all transactions, ordered by sequence number.
    pub async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        self.list_transactions_filtered(None, None, None, None, None, None)
            .await
    }

    /// List transactions with optional filters.
    pub async fn list_transactions_filtered(
        &self,
        account: Option<AccountRef>,
        ref_type: Option<&str>,
        from_date: Option<DateTime<Utc>>,
        to_date: Option<DateTime<Utc>>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let mut query = format!("SELECT {} FROM transactions WHERE 1=1", TRANSACTION_COLUMNS);

        let from_date_str = from_date.map(timestamp);
        let to_date_str = to_date.map(timestamp);

        if account.is_some() {
            query.push_str(" AND account_kind = ? AND account_id = ?");
        }
        if ref_type.is_some() {
            query.push_str(" AND ref_type = ?");
        }
        if from_date.is_some() {
            query.push_str(" AND created_at >= ?");
        }
        if to_date.is_some() {
            query.push_str(" AND created_at < ?");
        }

        query.push_str(" ORDER BY sequence");

        match (limit, offset) {
            (Some(lim), Some(off)) => query.push_str(&format!(" LIMIT {} OFFSET {}", lim, off)),
            (Some(lim), None) => query.push_str(&format!(" LIMIT {}", lim)),
            (None, Some(off)) => query.push_str(&format!(" LIMIT -1 OFFSET {}", off)),
            (None, None) => {}
        }

        let mut sql_query = sqlx::query(&query);

        if let Some(account) = account {
            sql_query = sql_query.bind(account.kind.as_str()).bind(account.id);
        }
        if let Some(rt) = ref_type {
            sql_query = sql_query.bind(rt);
        }
        if let Some(ref fd_str) = from_date_str {
            sql_query = sql_query.bind(fd_str);
        }
        if let Some(ref td_str) = to_date_str {
            sql_query = sql_query.bind(td_str);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list filtered transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Count transactions for an account (credits and debits separately).
    pub async fn count_transactions_for_account(&self, account: AccountRef) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN direction = 'credit' THEN 1 ELSE 0 END), 0) as credits,
                COALESCE(SUM(CASE WHEN direction = 'debit' THEN 1 ELSE 0 END), 0) as debits
            FROM transactions
            WHERE account_kind = ? AND account_id = ?
            "#,
        )
        .bind(account.kind.as_str())
        .bind(account.id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count transactions")?;

        Ok((row.get("credits"), row.get("debits")))
    }

    /// Compute every account's balance from the transaction log.
    pub async fn compute_all_balances(&self) -> Result<HashMap<AccountRef, Amount>> {
        let rows = sqlx::query(
            r#"
            SELECT
                account_kind,
                account_id,
                SUM(CASE WHEN direction = 'credit' THEN amount ELSE -amount END) as balance
            FROM transactions
            GROUP BY account_kind, account_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to compute all balances")?;

        let mut balances = HashMap::new();
        for row in rows {
            let kind_str: String = row.get("account_kind");
            let kind = AccountKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account kind: {}", kind_str))?;
            balances.insert(AccountRef::new(kind, row.get("account_id")), row.get("balance"));
        }

        Ok(balances)
    }

    /// Totals per reference type and direction for one account.
    pub async fn sum_by_reference_type(
        &self,
        account: AccountRef,
        from_date: Option<DateTime<Utc>>,
        to_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReferenceAggregate>> {
        let mut query = String::from(
            r#"
            SELECT ref_type, direction, COUNT(*) as count, COALESCE(SUM(amount), 0) as total
            FROM transactions
            WHERE account_kind = ? AND account_id = ?
            "#,
        );

        let from_date_str = from_date.map(timestamp);
        let to_date_str = to_date.map(timestamp);

        if from_date.is_some() {
            query.push_str(" AND created_at >= ?");
        }
        if to_date.is_some() {
            query.push_str(" AND created_at < ?");
        }
        query.push_str(" GROUP BY ref_type, direction ORDER BY ref_type, direction");

        let mut sql_query = sqlx::query(&query)
            .bind(account.kind.as_str())
            .bind(account.id);
        if let Some(ref fd_str) = from_date_str {
            sql_query = sql_query.bind(fd_str);
        }
        if let Some(ref td_str) = to_date_str {
            sql_query = sql_query.bind(td_str);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to aggregate transactions by reference type")?;

        rows.iter()
            .map(|row| {
                let ref_type: String = row.get("ref_type");
                let direction_str: String = row.get("direction");
                Ok(ReferenceAggregate {
                    ref_type: RefType::new(&ref_type)
                        .map_err(|e| anyhow::anyhow!("Invalid reference type {}: {}", ref_type, e))?,
                    direction: Direction::from_str(&direction_str)
                        .ok_or_else(|| anyhow::anyhow!("Invalid direction: {}", direction_str))?,
                    count: row.get("count"),
                    total: row.get("total"),
                })
            })
            .collect()
    }

    /// Get statistics for integrity checking.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let account_count: i64 = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count accounts")?;

        let transaction_count: i64 = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count transactions")?;

        let sequence_check = sqlx::query(
            r#"
            SELECT
                MIN(sequence) as min_seq,
                MAX(sequence) as max_seq,
                COUNT(*) as count
            FROM transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to check sequence")?;

        let min_seq: Option<i64> = sequence_check.get("min_seq");
        let max_seq: Option<i64> = sequence_check.get("max_seq");
        let count: i64 = sequence_check.get("count");

        let has_sequence_gaps = match (min_seq, max_seq) {
            (Some(min), Some(max)) => min != 1 || (max - min + 1) != count,
            _ => false,
        };

        let orphan_transactions: i64 = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM transactions t
            WHERE NOT EXISTS (
                SELECT 1 FROM accounts a
                WHERE a.kind = t.account_kind AND a.account_id = t.account_id
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count orphan transactions")?;

        let invalid_amounts: i64 =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions WHERE amount <= 0")
                .fetch_one(&self.pool)
                .await
                .context("Failed to count invalid amounts")?;

        Ok(IntegrityStats {
            account_count,
            transaction_count,
            has_sequence_gaps,
            orphan_transactions,
            invalid_amounts,
        })
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let batch_id_str: String = row.get("batch_id");
        let kind_str: String = row.get("account_kind");
        let direction_str: String = row.get("direction");
        let ref_type_str: String = row.get("ref_type");
        let created_at_str: String = row.get("created_at");

        let kind = AccountKind::from_str(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid account kind: {}", kind_str))?;

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            sequence: row.get("sequence"),
            batch_id: Uuid::parse_str(&batch_id_str).context("Invalid batch ID")?,
            account: AccountRef::new(kind, row.get("account_id")),
            amount: row.get("amount"),
            direction: Direction::from_str(&direction_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid direction: {}", direction_str))?,
            balance_after: row.get("balance_after"),
            ref_id: row.get("ref_id"),
            ref_type: RefType::new(&ref_type_str)
                .map_err(|e| anyhow::anyhow!("Invalid reference type {}: {}", ref_type_str, e))?,
            comment: row.get("comment"),
            created_at: parse_timestamp(&created_at_str, "created_at")?,
        })
    }
}
