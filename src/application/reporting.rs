use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AccountRef, Amount, Direction, RefType};

/// Where an account's coins came from and went, per reference type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceReport {
    pub account: AccountRef,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub references: Vec<ReferenceSummary>,
    pub total_credited: Amount,
    pub total_debited: Amount,
    pub net: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSummary {
    pub ref_type: RefType,
    pub credited: Amount,
    pub credit_count: i64,
    pub debited: Amount,
    pub debit_count: i64,
    pub net: Amount,
}

// Helper struct for repository aggregation
#[derive(Debug, Clone)]
pub struct ReferenceAggregate {
    pub ref_type: RefType,
    pub direction: Direction,
    pub count: i64,
    pub total: Amount,
}

/// Fold per-direction aggregates into one row per reference type.
/// Rows are ordered by reference type.
pub fn build_reference_report(
    account: AccountRef,
    from_date: Option<DateTime<Utc>>,
    to_date: Option<DateTime<Utc>>,
    aggregates: Vec<ReferenceAggregate>,
) -> ReferenceReport {
    let mut references: Vec<ReferenceSummary> = Vec::new();

    for aggregate in aggregates {
        let position = references
            .iter()
            .position(|r| r.ref_type == aggregate.ref_type);
        let summary = match position {
            Some(index) => &mut references[index],
            None => {
                references.push(ReferenceSummary {
                    ref_type: aggregate.ref_type.clone(),
                    credited: 0,
                    credit_count: 0,
                    debited: 0,
                    debit_count: 0,
                    net: 0,
                });
                let last = references.len() - 1;
                &mut references[last]
            }
        };

        match aggregate.direction {
            Direction::Credit => {
                summary.credited += aggregate.total;
                summary.credit_count += aggregate.count;
            }
            Direction::Debit => {
                summary.debited += aggregate.total;
                summary.debit_count += aggregate.count;
            }
        }
        summary.net = summary.credited - summary.debited;
    }

    references.sort_by(|a, b| a.ref_type.cmp(&b.ref_type));

    let total_credited = references.iter().map(|r| r.credited).sum();
    let total_debited = references.iter().map(|r| r.debited).sum();

    ReferenceReport {
        account,
        from_date,
        to_date,
        references,
        total_credited,
        total_debited,
        net: total_credited - total_debited,
    }
}
