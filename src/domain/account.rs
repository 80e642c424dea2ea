use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Amount;

/// Primary key of the owning entity (user id, guild id) in the platform schema.
pub type AccountId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountKind {
    /// A member's coin balance
    User,
    /// A guild bank
    Guild,
    /// Promotional credit pool, spendable only on platform services
    #[serde(rename = "credit-balance")]
    Credit,
}

impl AccountKind {
    pub const ALL: [AccountKind; 3] = [AccountKind::User, AccountKind::Guild, AccountKind::Credit];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::User => "user",
            AccountKind::Guild => "guild",
            AccountKind::Credit => "credit-balance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Some(AccountKind::User),
            "guild" => Some(AccountKind::Guild),
            "credit-balance" | "credit" => Some(AccountKind::Credit),
            _ => None,
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Address of a balance: the same numeric id may exist once per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountRef {
    pub kind: AccountKind,
    pub id: AccountId,
}

impl AccountRef {
    pub fn new(kind: AccountKind, id: AccountId) -> Self {
        Self { kind, id }
    }

    pub fn user(id: AccountId) -> Self {
        Self::new(AccountKind::User, id)
    }

    pub fn guild(id: AccountId) -> Self {
        Self::new(AccountKind::Guild, id)
    }

    pub fn credit(id: AccountId) -> Self {
        Self::new(AccountKind::Credit, id)
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAccountRefError {
    MissingSeparator,
    UnknownKind(String),
    InvalidId(String),
}

impl fmt::Display for ParseAccountRefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseAccountRefError::MissingSeparator => {
                write!(f, "account must be written as kind:id (e.g. user:42)")
            }
            ParseAccountRefError::UnknownKind(kind) => write!(f, "unknown account kind: {}", kind),
            ParseAccountRefError::InvalidId(id) => write!(f, "invalid account id: {}", id),
        }
    }
}

impl std::error::Error for ParseAccountRefError {}

impl FromStr for AccountRef {
    type Err = ParseAccountRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .trim()
            .rsplit_once(':')
            .ok_or(ParseAccountRefError::MissingSeparator)?;
        let kind = AccountKind::from_str(kind)
            .ok_or_else(|| ParseAccountRefError::UnknownKind(kind.to_string()))?;
        let id = id
            .parse::<AccountId>()
            .map_err(|_| ParseAccountRefError::InvalidId(id.to_string()))?;
        Ok(Self { kind, id })
    }
}

/// Cached balance projection for one account. Only the ledger mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub kind: AccountKind,
    pub id: AccountId,
    pub balance: Amount,
    /// Bumped on every balance mutation
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(account: AccountRef) -> Self {
        let now = Utc::now();
        Self {
            kind: account.kind,
            id: account.id,
            balance: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn account_ref(&self) -> AccountRef {
        AccountRef::new(self.kind, self.id)
    }

    pub fn covers(&self, amount: Amount) -> bool {
        self.balance >= amount
    }
}
