use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{Ledger, TransactionFilter};
use crate::config::LedgerConfig;
use crate::domain::{
    format_amount, parse_amount, AccountKind, AccountRef, Amount, Direction, Posting, RefType,
};
use crate::io::Exporter;

/// faucet-ledger - coin balances for users, guilds and promotional credit
#[derive(Parser)]
#[command(name = "faucet-ledger")]
#[command(about = "Operator tool for the faucet coin-transaction ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides LEDGER_DATABASE_URL)
    #[arg(short, long)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Show the balance of an account (e.g. user:42)
    Balance {
        account: AccountRef,
    },

    /// Credit an account
    Credit {
        #[command(flatten)]
        posting: PostingArgs,
    },

    /// Debit an account
    Debit {
        #[command(flatten)]
        posting: PostingArgs,
    },

    /// Move coins between two accounts atomically
    Transfer {
        /// Amount to move (e.g., "50.00" or "50")
        amount: String,

        /// Account to debit
        #[arg(long)]
        from: AccountRef,

        /// Account to credit
        #[arg(long)]
        to: AccountRef,

        /// Reference type (e.g., guild-deposit)
        #[arg(long)]
        ref_type: String,

        /// Reference id of the related entity
        #[arg(long)]
        ref_id: Option<i64>,

        /// Free-text comment
        #[arg(short, long, default_value = "")]
        comment: String,

        /// Idempotency key; repeating the command with it is a no-op
        #[arg(long)]
        key: Option<String>,
    },

    /// List transactions
    History {
        /// Filter by account
        #[arg(long)]
        account: Option<AccountRef>,

        /// Filter by reference type
        #[arg(long)]
        ref_type: Option<String>,

        /// Filter from date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        from_date: Option<String>,

        /// Filter to date (YYYY-MM-DD, exclusive)
        #[arg(long)]
        to_date: Option<String>,

        /// Maximum number of transactions to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Number of transactions to skip
        #[arg(long)]
        offset: Option<usize>,
    },

    /// Show a transaction and the rest of its batch
    Show {
        /// Transaction ID
        id: String,
    },

    /// Verify that cached balances match the transaction log
    Check,

    /// Totals per reference type for an account
    Report {
        account: AccountRef,

        /// From date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        from: Option<String>,

        /// To date (YYYY-MM-DD, exclusive)
        #[arg(long)]
        to: Option<String>,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Export data
    #[command(subcommand)]
    Export(ExportCommands),
}

#[derive(clap::Args)]
pub struct PostingArgs {
    /// Account (kind:id, e.g. user:42)
    account: AccountRef,

    /// Amount (e.g., "50.00" or "50")
    amount: String,

    /// Reference type (e.g., admin-adjustment)
    #[arg(long)]
    ref_type: String,

    /// Reference id of the related entity
    #[arg(long)]
    ref_id: Option<i64>,

    /// Free-text comment
    #[arg(short, long, default_value = "")]
    comment: String,

    /// Idempotency key; repeating the command with it is a no-op
    #[arg(long)]
    key: Option<String>,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account with a zero balance
    Open {
        account: AccountRef,
    },

    /// Show detailed account information
    Show {
        account: AccountRef,
    },

    /// List accounts
    List {
        /// Only this kind: user, guild, credit-balance
        #[arg(short, long)]
        kind: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ExportCommands {
    /// One account's statement as CSV
    Statement {
        account: AccountRef,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// All balances as CSV
    Balances {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// The whole ledger as JSON
    Full {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        let config = LedgerConfig::from_env();
        match &self.database {
            Some(path) => config.with_database_path(path),
            None => config,
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();

        if matches!(self.command, Commands::Init) {
            Ledger::init(&config).await?;
            println!("Database initialized: {}", config.database_url);
            return Ok(());
        }

        let ledger = Ledger::connect(&config)
            .await
            .with_context(|| format!("Failed to open {}", config.database_url))?;

        let result = run_command(&ledger, self.command).await;
        ledger.close().await;
        result
    }
}

async fn run_command(ledger: &Ledger, command: Commands) -> Result<()> {
    match command {
        // Connecting already migrated the database.
        Commands::Init => println!("Database ready"),

        Commands::Account(account_cmd) => run_account_command(ledger, account_cmd).await?,

        Commands::Balance { account } => {
            let balance = ledger.get_balance(account).await?;
            println!("{}: {}", account, format_amount(balance));
        }

        Commands::Credit { posting } => run_posting_command(ledger, posting, Direction::Credit).await?,

        Commands::Debit { posting } => run_posting_command(ledger, posting, Direction::Debit).await?,

        Commands::Transfer {
            amount,
            from,
            to,
            ref_type,
            ref_id,
            comment,
            key,
        } => {
            let amount = parse_amount_arg(&amount)?;
            let receipt = ledger
                .transfer(from, to, amount, &ref_type, ref_id, &comment, key.as_deref())
                .await?;

            println!(
                "{} transfer: {} {} -> {} (batch {})",
                if receipt.replayed { "Replayed" } else { "Recorded" },
                format_amount(amount),
                from,
                to,
                receipt.batch_id
            );
            println!("  {}: {}", from, format_amount(receipt.debit.balance_after));
            println!("  {}: {}", to, format_amount(receipt.credit.balance_after));
        }

        Commands::History {
            account,
            ref_type,
            from_date,
            to_date,
            limit,
            offset,
        } => {
            let filter = TransactionFilter {
                account,
                ref_type,
                from_date: from_date.as_deref().map(parse_date).transpose().context("Invalid from-date")?,
                to_date: to_date.as_deref().map(parse_date).transpose().context("Invalid to-date")?,
                limit,
                offset,
            };
            run_history_command(ledger, filter).await?;
        }

        Commands::Show { id } => {
            let id = Uuid::parse_str(&id).context("Invalid transaction ID")?;
            run_show_command(ledger, id).await?;
        }

        Commands::Check => run_check_command(ledger).await?,

        Commands::Report {
            account,
            from,
            to,
            format,
        } => {
            let from = from.as_deref().map(parse_date).transpose().context("Invalid from date")?;
            let to = to.as_deref().map(parse_date).transpose().context("Invalid to date")?;
            let report = ledger.reference_report(account, from, to).await?;

            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&report)?),
                "table" => {
                    println!(
                        "{:<24} {:>12} {:>6} {:>12} {:>6} {:>12}",
                        "REFERENCE", "CREDITED", "#", "DEBITED", "#", "NET"
                    );
                    println!("{}", "-".repeat(78));
                    for r in &report.references {
                        println!(
                            "{:<24} {:>12} {:>6} {:>12} {:>6} {:>12}",
                            truncate(r.ref_type.as_str(), 24),
                            format_amount(r.credited),
                            r.credit_count,
                            format_amount(r.debited),
                            r.debit_count,
                            format_amount(r.net)
                        );
                    }
                    println!("{}", "-".repeat(78));
                    println!(
                        "{:<24} {:>12} {:>6} {:>12} {:>6} {:>12}",
                        "TOTAL",
                        format_amount(report.total_credited),
                        "",
                        format_amount(report.total_debited),
                        "",
                        format_amount(report.net)
                    );
                }
                other => anyhow::bail!("Unknown format '{}'. Use table or json", other),
            }
        }

        Commands::Export(export_cmd) => run_export_command(ledger, export_cmd).await?,
    }

    Ok(())
}

async fn run_account_command(ledger: &Ledger, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Open { account } => {
            ledger.open_account(account).await?;
            println!("Opened account {}", account);
        }

        AccountCommands::Show { account } => {
            let info = ledger.get_account_info(account).await?;
            println!("Account:  {}", account);
            println!("Balance:  {}", format_amount(info.account.balance));
            println!("Version:  {}", info.account.version);
            println!("Credits:  {}", info.credit_count);
            println!("Debits:   {}", info.debit_count);
            println!("Opened:   {}", info.account.created_at.format("%Y-%m-%d %H:%M:%S"));
            println!("Updated:  {}", info.account.updated_at.format("%Y-%m-%d %H:%M:%S"));
        }

        AccountCommands::List { kind } => {
            let kind = kind
                .map(|k| {
                    AccountKind::from_str(&k)
                        .ok_or_else(|| anyhow::anyhow!("Unknown account kind '{}'", k))
                })
                .transpose()?;
            let accounts = ledger.list_accounts(kind).await?;

            if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!("{:<28} {:>14}", "ACCOUNT", "BALANCE");
                println!("{}", "-".repeat(43));
                for account in accounts {
                    println!(
                        "{:<28} {:>14}",
                        account.account_ref().to_string(),
                        format_amount(account.balance)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_posting_command(ledger: &Ledger, args: PostingArgs, direction: Direction) -> Result<()> {
    let amount = parse_amount_arg(&args.amount)?;
    let ref_type = RefType::new(&args.ref_type)
        .map_err(|e| anyhow::anyhow!("Invalid reference type '{}': {}", args.ref_type, e))?;

    let mut posting = Posting::new(args.account, amount, direction, ref_type).with_comment(args.comment);
    if let Some(ref_id) = args.ref_id {
        posting = posting.with_ref_id(ref_id);
    }

    let receipt = match args.key.as_deref() {
        Some(key) => ledger.post_idempotent(posting, key).await?,
        None => ledger.post(posting).await?,
    };

    println!(
        "{} {} {} on {} ({}), balance {}",
        if receipt.replayed { "Replayed" } else { "Recorded" },
        direction,
        format_amount(amount),
        args.account,
        receipt.transaction.id,
        format_amount(receipt.balance)
    );
    Ok(())
}

async fn run_history_command(ledger: &Ledger, filter: TransactionFilter) -> Result<()> {
    let transactions = ledger.history(filter).await?;

    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:>6} {:<12} {:<24} {:<6} {:>12} {:>12} {:<20} COMMENT",
        "SEQ", "DATE", "ACCOUNT", "DIR", "AMOUNT", "BALANCE", "REFERENCE"
    );
    println!("{}", "-".repeat(110));

    for t in &transactions {
        let reference = match t.ref_id {
            Some(id) => format!("{}#{}", t.ref_type, id),
            None => t.ref_type.to_string(),
        };
        println!(
            "{:>6} {:<12} {:<24} {:<6} {:>12} {:>12} {:<20} {}",
            t.sequence,
            t.created_at.format("%Y-%m-%d"),
            t.account.to_string(),
            t.direction.as_str(),
            format_amount(t.amount),
            format_amount(t.balance_after),
            truncate(&reference, 20),
            truncate(&t.comment, 30)
        );
    }
    Ok(())
}

async fn run_show_command(ledger: &Ledger, id: Uuid) -> Result<()> {
    let transaction = ledger.get_transaction(id).await?;

    println!("Transaction: {}", transaction.id);
    println!("Sequence:    {}", transaction.sequence);
    println!("Account:     {}", transaction.account);
    println!("Direction:   {}", transaction.direction);
    println!("Amount:      {}", format_amount(transaction.amount));
    println!("Balance:     {}", format_amount(transaction.balance_after));
    println!("Reference:   {}", transaction.ref_type);
    if let Some(ref_id) = transaction.ref_id {
        println!("Ref ID:      {}", ref_id);
    }
    if !transaction.comment.is_empty() {
        println!("Comment:     {}", transaction.comment);
    }
    println!("Recorded:    {}", transaction.created_at.to_rfc3339());
    println!("Batch:       {}", transaction.batch_id);

    let batch = ledger.get_batch(transaction.batch_id).await?;
    let others: Vec<_> = batch.iter().filter(|t| t.id != transaction.id).collect();
    if !others.is_empty() {
        println!("\nOther legs in this batch:");
        for t in others {
            println!(
                "  {} {} {} ({})",
                t.account,
                t.direction,
                format_amount(t.amount),
                t.id
            );
        }
    }
    Ok(())
}

async fn run_check_command(ledger: &Ledger) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = ledger.check_integrity().await?;

    println!("Accounts:     {}", report.account_count);
    println!("Transactions: {}", report.transaction_count);
    println!();

    println!("Balance by kind:");
    for kind in AccountKind::ALL {
        let balance = report.balance_by_kind.get(&kind).copied().unwrap_or(0);
        println!("  {:<16} {:>14}", format!("{}:", kind), format_amount(balance));
    }
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

async fn run_export_command(ledger: &Ledger, cmd: ExportCommands) -> Result<()> {
    let exporter = Exporter::new(ledger);

    match cmd {
        ExportCommands::Statement { account, output } => {
            let count = match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path))?;
                    exporter.export_statement_csv(account, file).await?
                }
                None => exporter.export_statement_csv(account, std::io::stdout()).await?,
            };
            eprintln!("Exported {} transaction(s) for {}", count, account);
        }

        ExportCommands::Balances { output } => {
            let count = match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path))?;
                    exporter.export_balances_csv(file).await?
                }
                None => exporter.export_balances_csv(std::io::stdout()).await?,
            };
            eprintln!("Exported {} account(s)", count);
        }

        ExportCommands::Full { output } => {
            let snapshot = match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path))?;
                    exporter.export_full_json(file).await?
                }
                None => exporter.export_full_json(std::io::stdout()).await?,
            };
            eprintln!(
                "Exported {} account(s) and {} transaction(s)",
                snapshot.accounts.len(),
                snapshot.transactions.len()
            );
        }
    }
    Ok(())
}

fn parse_amount_arg(input: &str) -> Result<Amount> {
    parse_amount(input)
        .with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", input))
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    use chrono::NaiveDate;

    let naive_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .context("Date must be in YYYY-MM-DD format")?;

    let naive_datetime = naive_date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid date"))?;

    Ok(DateTime::from_naive_utc_and_offset(naive_datetime, Utc))
}
