//! Storage configuration.

use std::path::Path;
use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "sqlite:faucet-ledger.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Ledger configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// SQLite URL (default: "sqlite:faucet-ledger.db").
    pub database_url: String,

    /// Connection pool size (default: 5).
    pub max_connections: u32,

    /// How long a writer waits for the database lock (default: 5s).
    pub busy_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from `LEDGER_*` environment variables.
    /// Missing or unparsable values fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("LEDGER_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            max_connections: lookup("LEDGER_MAX_CONNECTIONS")
                .and_then(|s| s.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            busy_timeout: Duration::from_millis(
                lookup("LEDGER_BUSY_TIMEOUT_MS")
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
            ),
        }
    }

    /// Configuration pointing at a database file.
    #[must_use]
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self::default().with_database_path(path)
    }

    #[must_use]
    pub fn with_database_path(mut self, path: impl AsRef<Path>) -> Self {
        self.database_url = format!("sqlite:{}", path.as_ref().display());
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }
}
