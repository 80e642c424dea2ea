mod common;

use std::time::Duration;

use anyhow::Result;
use common::{funded_user, tag, test_ledger};
use faucet_ledger::application::{LedgerError, TransactionFilter};
use faucet_ledger::domain::{AccountKind, AccountRef, Direction, Posting, RefType, compute_balance};

#[tokio::test]
async fn test_debit_returns_new_balance_and_records_one_row() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = funded_user(&ledger, 1, 100).await?;

    let balance = ledger
        .execute_transaction(30, Direction::Debit, 1, Some(1), "x", "")
        .await?;
    assert_eq!(balance, 70);

    let debits: Vec<_> = ledger
        .history(TransactionFilter::for_account(user))
        .await?
        .into_iter()
        .filter(|t| t.direction == Direction::Debit)
        .collect();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].amount, 30);
    assert_eq!(debits[0].balance_after, 70);
    assert_eq!(debits[0].ref_id, Some(1));
    assert_eq!(debits[0].ref_type.as_str(), "x");

    Ok(())
}

#[tokio::test]
async fn test_overdraft_is_rejected_without_side_effects() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = funded_user(&ledger, 1, 20).await?;
    let before = ledger.history(TransactionFilter::for_account(user)).await?.len();

    let result = ledger
        .execute_transaction(30, Direction::Debit, 1, Some(1), "x", "")
        .await;

    match result {
        Err(LedgerError::InsufficientFunds {
            account,
            balance,
            required,
        }) => {
            assert_eq!(account, user);
            assert_eq!(balance, 20);
            assert_eq!(required, 30);
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }

    assert_eq!(ledger.get_balance(user).await?, 20);
    assert_eq!(
        ledger.history(TransactionFilter::for_account(user)).await?.len(),
        before
    );
    assert_eq!(ledger.get_account(user).await?.version, 1);

    Ok(())
}

#[tokio::test]
async fn test_zero_and_negative_amounts_are_invalid() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    funded_user(&ledger, 1, 50).await?;

    let zero = ledger
        .execute_transaction(0, Direction::Credit, 1, None, "x", "")
        .await;
    assert!(matches!(zero, Err(LedgerError::InvalidAmount(0))));

    let negative = ledger
        .execute_transaction(-5, Direction::Debit, 1, None, "x", "")
        .await;
    assert!(matches!(negative, Err(LedgerError::InvalidAmount(-5))));

    assert_eq!(ledger.get_balance(AccountRef::user(1)).await?, 50);
    Ok(())
}

#[tokio::test]
async fn test_unknown_account_is_not_found() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;

    let result = ledger
        .execute_transaction(10, Direction::Credit, 404, None, "faucet-claim", "")
        .await;
    assert!(matches!(
        result,
        Err(LedgerError::AccountNotFound(account)) if account == AccountRef::user(404)
    ));

    let check = ledger.check_balance(AccountRef::user(404), 1).await;
    assert!(matches!(check, Err(LedgerError::AccountNotFound(_))));

    assert!(ledger.list_all_transactions().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invalid_reference_type() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    funded_user(&ledger, 1, 50).await?;

    let result = ledger
        .execute_transaction(10, Direction::Credit, 1, None, "Not A Tag", "")
        .await;
    assert!(matches!(result, Err(LedgerError::InvalidReference(_))));
    Ok(())
}

#[tokio::test]
async fn test_check_balance_is_advisory_and_read_only() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = funded_user(&ledger, 1, 100).await?;

    assert!(ledger.check_balance(user, 100).await?);
    assert!(!ledger.check_balance(user, 101).await?);
    assert!(matches!(
        ledger.check_balance(user, 0).await,
        Err(LedgerError::InvalidAmount(0))
    ));
    assert_eq!(ledger.get_account(user).await?.version, 1);

    Ok(())
}

#[tokio::test]
async fn test_account_kinds_are_independent() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    ledger.open_account(AccountRef::user(5)).await?;
    ledger.open_account(AccountRef::guild(5)).await?;
    ledger.open_account(AccountRef::credit(5)).await?;

    ledger
        .execute_transaction(500, Direction::Credit, 5, None, RefType::FAUCET_CLAIM, "")
        .await?;
    ledger
        .execute_guild_transaction(200, Direction::Credit, 5, None, RefType::GUILD_DEPOSIT, "")
        .await?;
    ledger
        .execute_credit_transaction(50, Direction::Credit, 5, None, RefType::OFFERWALL_CREDIT, "")
        .await?;

    let spent = ledger
        .execute_credit_transaction(20, Direction::Debit, 5, Some(3), RefType::MARKETPLACE_PURCHASE, "")
        .await?;
    assert_eq!(spent, 30);

    let overdraft = ledger
        .execute_credit_transaction(31, Direction::Debit, 5, None, RefType::MARKETPLACE_PURCHASE, "")
        .await;
    assert!(matches!(overdraft, Err(LedgerError::InsufficientFunds { .. })));

    assert_eq!(ledger.get_balance(AccountRef::user(5)).await?, 500);
    assert_eq!(ledger.get_balance(AccountRef::guild(5)).await?, 200);
    assert_eq!(ledger.get_balance(AccountRef::credit(5)).await?, 30);

    assert_eq!(ledger.list_accounts(Some(AccountKind::Guild)).await?.len(), 1);
    assert_eq!(ledger.list_accounts(None).await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_balance_equals_sum_of_transactions() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = funded_user(&ledger, 1, 1000).await?;

    let steps = [
        (250, Direction::Debit, true),
        (75, Direction::Credit, true),
        (10, Direction::Debit, true),
        (900, Direction::Debit, false),
        (5, Direction::Credit, true),
        (820, Direction::Debit, true),
    ];
    for (amount, direction, accepted) in steps {
        let result = ledger
            .execute_transaction(amount, direction, 1, None, RefType::SHORTLINK_COMPLETE, "")
            .await;
        if accepted {
            assert!(result.is_ok(), "{} {} failed: {:?}", direction, amount, result);
        } else {
            assert!(
                matches!(result, Err(LedgerError::InsufficientFunds { balance: 815, required: 900, .. })),
                "expected InsufficientFunds, got {:?}",
                result
            );
        }
    }

    let transactions = ledger.history(TransactionFilter::for_account(user)).await?;
    let balance = ledger.get_balance(user).await?;
    assert_eq!(balance, compute_balance(user, &transactions));
    assert_eq!(balance, 0);
    assert_eq!(transactions.last().map(|t| t.balance_after), Some(0));

    Ok(())
}

#[tokio::test]
async fn test_open_account_twice_fails_and_ensure_is_idempotent() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let guild = AccountRef::guild(9);

    ledger.open_account(guild).await?;
    assert!(matches!(
        ledger.open_account(guild).await,
        Err(LedgerError::AccountAlreadyExists(account)) if account == guild
    ));

    let ensured = ledger.ensure_account(guild).await?;
    assert_eq!(ensured.balance, 0);
    let created = ledger.ensure_account(AccountRef::credit(9)).await?;
    assert_eq!(created.account_ref(), AccountRef::credit(9));

    Ok(())
}

#[tokio::test]
async fn test_idempotent_post_is_applied_once() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = funded_user(&ledger, 1, 0).await?;

    let posting = Posting::credit(user, 250, tag(RefType::ACHIEVEMENT_CLAIM))
        .with_ref_id(12)
        .with_comment("first login");

    let first = ledger.post_idempotent(posting.clone(), "achievement-12-user-1").await?;
    let second = ledger.post_idempotent(posting, "achievement-12-user-1").await?;

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.transaction.id, second.transaction.id);
    assert_eq!(second.balance, 250);
    assert_eq!(ledger.get_balance(user).await?, 250);
    assert_eq!(ledger.list_all_transactions().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_idempotency_key_reuse_with_different_request_conflicts() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = funded_user(&ledger, 1, 0).await?;

    ledger
        .post_idempotent(Posting::credit(user, 100, tag("faucet-claim")), "claim-1")
        .await?;
    let result = ledger
        .post_idempotent(Posting::credit(user, 999, tag("faucet-claim")), "claim-1")
        .await;

    assert!(matches!(result, Err(LedgerError::IdempotencyConflict(key)) if key == "claim-1"));
    assert_eq!(ledger.get_balance(user).await?, 100);
    Ok(())
}

#[tokio::test]
async fn test_failed_request_does_not_consume_idempotency_key() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = funded_user(&ledger, 1, 10).await?;
    let debit = Posting::debit(user, 40, tag(RefType::LOTTERY_TICKET)).with_ref_id(3);

    let rejected = ledger.post_idempotent(debit.clone(), "ticket-3").await;
    assert!(matches!(rejected, Err(LedgerError::InsufficientFunds { .. })));

    ledger
        .execute_transaction(30, Direction::Credit, 1, None, RefType::FAUCET_CLAIM, "")
        .await?;
    let receipt = ledger.post_idempotent(debit, "ticket-3").await?;
    assert!(!receipt.replayed);
    assert_eq!(receipt.balance, 0);

    Ok(())
}

#[tokio::test]
async fn test_history_filters_and_paging() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = funded_user(&ledger, 1, 0).await?;
    funded_user(&ledger, 2, 0).await?;

    for i in 0..5 {
        ledger
            .execute_transaction(10, Direction::Credit, 1, Some(i), RefType::SHORTLINK_COMPLETE, "")
            .await?;
    }
    ledger
        .execute_transaction(7, Direction::Credit, 1, None, RefType::FAUCET_CLAIM, "")
        .await?;
    ledger
        .execute_transaction(3, Direction::Credit, 2, None, RefType::FAUCET_CLAIM, "")
        .await?;

    let all_for_user = ledger.history(TransactionFilter::for_account(user)).await?;
    assert_eq!(all_for_user.len(), 6);
    assert!(all_for_user.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let shortlinks = ledger
        .history(TransactionFilter {
            ref_type: Some(RefType::SHORTLINK_COMPLETE.to_string()),
            ..Default::default()
        })
        .await?;
    assert_eq!(shortlinks.len(), 5);

    let page = ledger
        .history(TransactionFilter {
            account: Some(user),
            limit: Some(2),
            offset: Some(2),
            ..Default::default()
        })
        .await?;
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].sequence, all_for_user[2].sequence);

    let by_reference = ledger
        .find_by_reference(RefType::SHORTLINK_COMPLETE, 3)
        .await?;
    assert_eq!(by_reference.len(), 1);
    assert_eq!(by_reference[0].account, user);

    let fetched = ledger.get_transaction(by_reference[0].id).await?;
    assert_eq!(fetched.sequence, by_reference[0].sequence);
    assert_eq!(fetched.created_at, by_reference[0].created_at);

    Ok(())
}

#[tokio::test]
async fn test_missing_transaction() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let result = ledger.get_transaction(uuid::Uuid::new_v4()).await;
    assert!(matches!(result, Err(LedgerError::TransactionNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_account_info_counts() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = funded_user(&ledger, 1, 100).await?;
    ledger
        .execute_transaction(40, Direction::Debit, 1, None, RefType::WITHDRAWAL, "")
        .await?;

    let info = ledger.get_account_info(user).await?;
    assert_eq!(info.credit_count, 1);
    assert_eq!(info.debit_count, 1);
    assert_eq!(info.account.balance, 60);
    assert_eq!(info.account.version, 2);
    Ok(())
}

#[tokio::test]
async fn test_history_date_window_is_start_inclusive_end_exclusive() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = funded_user(&ledger, 1, 0).await?;

    for amount in [10, 20, 40] {
        ledger
            .execute_transaction(amount, Direction::Credit, 1, None, RefType::FAUCET_CLAIM, "")
            .await?;
        std::thread::sleep(Duration::from_millis(2));
    }
    let all = ledger.history(TransactionFilter::for_account(user)).await?;
    assert_eq!(all.len(), 3);

    let window = ledger
        .history(TransactionFilter {
            account: Some(user),
            from_date: Some(all[1].created_at),
            to_date: Some(all[2].created_at),
            ..Default::default()
        })
        .await?;
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].id, all[1].id);

    let before_first = ledger
        .history(TransactionFilter {
            account: Some(user),
            to_date: Some(all[0].created_at),
            ..Default::default()
        })
        .await?;
    assert!(before_first.is_empty());

    let from_last = ledger
        .history(TransactionFilter {
            account: Some(user),
            from_date: Some(all[2].created_at),
            ..Default::default()
        })
        .await?;
    assert_eq!(from_last.len(), 1);
    assert_eq!(from_last[0].id, all[2].id);

    // History and the reference report agree on the same window.
    let report = ledger
        .reference_report(user, None, Some(all[2].created_at))
        .await?;
    assert_eq!(report.total_credited, 30);

    Ok(())
}

#[tokio::test]
async fn test_credit_past_max_balance_is_rejected() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = funded_user(&ledger, 1, 10).await?;
    let other = funded_user(&ledger, 2, 0).await?;

    let result = ledger
        .execute_transaction(i64::MAX, Direction::Credit, 1, None, RefType::MINING_PAYOUT, "")
        .await;
    match result {
        Err(LedgerError::BalanceOverflow {
            account,
            balance,
            amount,
        }) => {
            assert_eq!(account, user);
            assert_eq!(balance, 10);
            assert_eq!(amount, i64::MAX);
        }
        other => panic!("expected BalanceOverflow, got {:?}", other),
    }
    assert_eq!(ledger.get_account(user).await?.version, 1);

    // An overflowing leg rolls back the legs before it.
    let batch = ledger
        .post_batch(
            vec![
                Posting::credit(other, 5, tag(RefType::MINING_PAYOUT)),
                Posting::credit(user, i64::MAX - 5, tag(RefType::MINING_PAYOUT)),
            ],
            None,
        )
        .await;
    assert!(matches!(batch, Err(LedgerError::BalanceOverflow { .. })));
    assert_eq!(ledger.get_balance(other).await?, 0);

    let balance = ledger
        .execute_transaction(i64::MAX - 10, Direction::Credit, 1, None, RefType::MINING_PAYOUT, "")
        .await?;
    assert_eq!(balance, i64::MAX);
    assert_eq!(ledger.list_all_transactions().await?.len(), 2);

    Ok(())
}
