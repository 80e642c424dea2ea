use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountRef, Amount};

pub type TransactionId = Uuid;
pub type BatchId = Uuid;

/// Opaque key of the business entity a transaction relates to
/// (shortlink id, lottery ticket id, guild id, ...).
pub type ReferenceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Adds to the balance
    Credit,
    /// Subtracts from the balance
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "credit",
            Direction::Debit => "debit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "credit" => Some(Direction::Credit),
            "debit" => Some(Direction::Debit),
            _ => None,
        }
    }

    pub fn from_is_credit(is_credit: bool) -> Self {
        if is_credit {
            Direction::Credit
        } else {
            Direction::Debit
        }
    }

    /// Apply the direction's sign to a positive amount.
    pub fn signed(&self, amount: Amount) -> Amount {
        match self {
            Direction::Credit => amount,
            Direction::Debit => -amount,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tag classifying why a transaction happened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefType(String);

impl RefType {
    pub const MAX_LEN: usize = 64;

    pub const SHORTLINK_COMPLETE: &'static str = "shortlink-complete";
    pub const FAUCET_CLAIM: &'static str = "faucet-claim";
    pub const LOTTERY_TICKET: &'static str = "lottery-ticket";
    pub const LOTTERY_WIN: &'static str = "lottery-win";
    pub const GUILD_DEPOSIT: &'static str = "guild-deposit";
    pub const GUILD_WITHDRAWAL: &'static str = "guild-withdrawal";
    pub const ACHIEVEMENT_CLAIM: &'static str = "achievement-claim";
    pub const MARKETPLACE_PURCHASE: &'static str = "marketplace-purchase";
    pub const MARKETPLACE_SALE: &'static str = "marketplace-sale";
    pub const MINING_PAYOUT: &'static str = "mining-payout";
    pub const OFFERWALL_CREDIT: &'static str = "offerwall-credit";
    pub const WITHDRAWAL: &'static str = "withdrawal";
    pub const ADMIN_ADJUSTMENT: &'static str = "admin-adjustment";

    pub fn new(tag: impl AsRef<str>) -> Result<Self, InvalidRefType> {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            return Err(InvalidRefType::Empty);
        }
        if tag.len() > Self::MAX_LEN {
            return Err(InvalidRefType::TooLong(tag.len()));
        }
        if let Some(c) = tag
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')))
        {
            return Err(InvalidRefType::InvalidChar(c));
        }
        Ok(Self(tag.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RefType {
    type Error = InvalidRefType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RefType::new(value)
    }
}

impl TryFrom<&str> for RefType {
    type Error = InvalidRefType;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        RefType::new(value)
    }
}

impl From<RefType> for String {
    fn from(value: RefType) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidRefType {
    Empty,
    TooLong(usize),
    InvalidChar(char),
}

impl fmt::Display for InvalidRefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidRefType::Empty => write!(f, "reference type must not be empty"),
            InvalidRefType::TooLong(len) => write!(
                f,
                "reference type is {} characters, limit is {}",
                len,
                RefType::MAX_LEN
            ),
            InvalidRefType::InvalidChar(c) => {
                write!(f, "reference type contains invalid character {:?}", c)
            }
        }
    }
}

impl std::error::Error for InvalidRefType {}

/// A requested balance change, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub account: AccountRef,
    pub amount: Amount,
    pub direction: Direction,
    pub ref_id: Option<ReferenceId>,
    pub ref_type: RefType,
    pub comment: String,
}

impl Posting {
    pub fn new(account: AccountRef, amount: Amount, direction: Direction, ref_type: RefType) -> Self {
        Self {
            account,
            amount,
            direction,
            ref_id: None,
            ref_type,
            comment: String::new(),
        }
    }

    pub fn credit(account: AccountRef, amount: Amount, ref_type: RefType) -> Self {
        Self::new(account, amount, Direction::Credit, ref_type)
    }

    pub fn debit(account: AccountRef, amount: Amount, ref_type: RefType) -> Self {
        Self::new(account, amount, Direction::Debit, ref_type)
    }

    pub fn with_ref_id(mut self, ref_id: ReferenceId) -> Self {
        self.ref_id = Some(ref_id);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn signed_amount(&self) -> Amount {
        self.direction.signed(self.amount)
    }

    /// Whether an already recorded transaction is the result of this posting.
    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.account == transaction.account
            && self.amount == transaction.amount
            && self.direction == transaction.direction
            && self.ref_type == transaction.ref_type
            && self.ref_id == transaction.ref_id
    }
}

/// An immutable ledger entry. Corrections are made with compensating
/// transactions, never by editing a recorded one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Global, gapless ordering assigned by the repository
    pub sequence: i64,
    /// Shared by every leg committed in the same unit of work
    pub batch_id: BatchId,
    pub account: AccountRef,
    /// Always positive
    pub amount: Amount,
    pub direction: Direction,
    /// Account balance right after this leg was applied
    pub balance_after: Amount,
    pub ref_id: Option<ReferenceId>,
    pub ref_type: RefType,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Materialize a posting. Sequence and balance are assigned by the repository.
    pub fn from_posting(posting: &Posting, batch_id: BatchId) -> Self {
        assert!(posting.amount > 0, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            batch_id,
            account: posting.account,
            amount: posting.amount,
            direction: posting.direction,
            balance_after: 0,
            ref_id: posting.ref_id,
            ref_type: posting.ref_type.clone(),
            comment: posting.comment.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn signed_amount(&self) -> Amount {
        self.direction.signed(self.amount)
    }

    pub fn is_credit(&self) -> bool {
        self.direction == Direction::Credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(s: &str) -> RefType {
        RefType::new(s).unwrap()
    }

    #[test]
    fn test_direction_from_is_credit() {
        assert_eq!(Direction::from_is_credit(true), Direction::Credit);
        assert_eq!(Direction::from_is_credit(false), Direction::Debit);
        assert_eq!(Direction::Debit.signed(30), -30);
    }

    #[test]
    fn test_ref_type_validation() {
        assert_eq!(tag(" lottery-ticket ").as_str(), "lottery-ticket");
        assert_eq!(RefType::new(""), Err(InvalidRefType::Empty));
        assert_eq!(RefType::new("Lottery"), Err(InvalidRefType::InvalidChar('L')));
        assert_eq!(RefType::new("a b"), Err(InvalidRefType::InvalidChar(' ')));
        assert!(matches!(
            RefType::new("x".repeat(65)),
            Err(InvalidRefType::TooLong(65))
        ));
    }

    #[test]
    fn test_ref_type_serde_validates() {
        let parsed: RefType = serde_json::from_str("\"guild-deposit\"").unwrap();
        assert_eq!(parsed.as_str(), RefType::GUILD_DEPOSIT);
        assert!(serde_json::from_str::<RefType>("\"\"").is_err());
    }

    #[test]
    fn test_posting_builders() {
        let posting = Posting::debit(AccountRef::user(1), 3000, tag(RefType::LOTTERY_TICKET))
            .with_ref_id(17)
            .with_comment("2 tickets");

        assert_eq!(posting.signed_amount(), -3000);
        assert_eq!(posting.ref_id, Some(17));
        assert_eq!(posting.comment, "2 tickets");
    }

    #[test]
    fn test_transaction_from_posting_matches() {
        let posting = Posting::credit(AccountRef::guild(7), 500, tag(RefType::GUILD_DEPOSIT))
            .with_ref_id(1);
        let transaction = Transaction::from_posting(&posting, Uuid::new_v4());

        assert!(posting.matches(&transaction));
        assert!(transaction.is_credit());
        assert_eq!(transaction.signed_amount(), 500);

        let other = Posting::credit(AccountRef::guild(7), 501, tag(RefType::GUILD_DEPOSIT))
            .with_ref_id(1);
        assert!(!other.matches(&transaction));
    }

    #[test]
    #[should_panic(expected = "Transaction amount must be positive")]
    fn test_transaction_requires_positive_amount() {
        let posting = Posting::credit(AccountRef::user(1), 0, tag("x"));
        Transaction::from_posting(&posting, Uuid::new_v4());
    }
}
