mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

use relay_gateway::dao::transaction::{get_transaction_by_id, TransactionStatus};
use relay_gateway::relay::billing::{BillingLedger, CommitDetails, LedgerConfig, ReservationDetails};
use relay_gateway::relay::channel::Channel;
use relay_gateway::relay::error::{AuthError, BillingError, RelayError};

use common::{seed_client, setup_pool, setup_pool_with_busy_timeout};

fn details() -> ReservationDetails {
    ReservationDetails::new(Channel::Sms, "+15551234567")
}

fn commit_details(pmid: &str) -> CommitDetails {
    CommitDetails {
        provider_message_id: pmid.to_string(),
        provider_status: "queued".to_string(),
        account_sid: "AC_test".to_string(),
    }
}

#[tokio::test]
async fn test_concurrent_reservations_never_overdraw() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(10.00)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());

    println!("=== Two concurrent 7.50 reservations against a 10.00 balance ===");
    let details = details();
    let (a, b) = tokio::join!(
        ledger.reserve(&client_id, dec!(7.50), &details),
        ledger.reserve(&client_id, dec!(7.50), &details),
    );

    let results = [a, b];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1, "exactly one reservation must succeed: {:?}", results);

    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        failure,
        RelayError::Billing(BillingError::InsufficientFunds { .. })
    ));

    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(2.50)));
    println!("✅ Balance ends at 2.50");
}

#[tokio::test]
async fn test_many_concurrent_reservations_sum_to_balance() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(1.00)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());
    let details = details();

    let attempts = (0..25).map(|_| ledger.reserve(&client_id, dec!(0.10), &details));
    let results = futures::future::join_all(attempts).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 10);
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(0)));
    println!("✅ {} of 25 reservations succeeded", succeeded);
}

#[tokio::test]
async fn test_insufficient_funds_reports_balance() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(0.005)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());

    let err = ledger.reserve(&client_id, dec!(0.0075), &details()).await.unwrap_err();
    assert_eq!(
        err,
        RelayError::Billing(BillingError::InsufficientFunds {
            balance: dec!(0.005),
            required: dec!(0.0075),
        })
    );
    assert_eq!(err.status_code(), 402);
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(0.005)));
}

#[tokio::test]
async fn test_reserve_rejects_unknown_client_and_bad_amounts() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(5)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());

    let err = ledger.reserve("no-such-client", dec!(1), &details()).await.unwrap_err();
    assert_eq!(err, RelayError::Auth(AuthError::InvalidKey));

    for amount in [dec!(0), dec!(-1), dec!(0.00001)] {
        let err = ledger.reserve(&client_id, amount, &details()).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request", "amount {}", amount);
    }
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(5)));
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(10)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());

    let token = ledger.reserve(&client_id, dec!(7.50), &details()).await.unwrap();
    assert_eq!(token.balance_after, dec!(2.50));

    assert!(ledger.release(&token, "provider timeout").await.unwrap());
    assert!(!ledger.release(&token, "provider timeout").await.unwrap());
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(10)));

    let transaction = get_transaction_by_id(&pool, &token.transaction_id).await.unwrap().unwrap();
    assert_eq!(transaction.status(), Some(TransactionStatus::Failed));
    assert_eq!(transaction.failure_reason.as_deref(), Some("provider timeout"));
    println!("✅ Second release was a no-op");
}

#[tokio::test]
async fn test_commit_settles_and_records_provider_id() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(1)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());

    let token = ledger.reserve(&client_id, dec!(0.0075), &details()).await.unwrap();
    let transaction = ledger
        .commit(&token, dec!(0.0075), &commit_details("SM123"))
        .await
        .unwrap();

    assert_eq!(transaction.status(), Some(TransactionStatus::Committed));
    assert_eq!(transaction.provider_message_id.as_deref(), Some("SM123"));
    assert_eq!(transaction.account_sid.as_deref(), Some("AC_test"));
    assert_eq!(transaction.delivery_status.as_deref(), Some("queued"));
    assert_eq!(transaction.balance_after_units, 9925);

    // 重复提交返回同一笔交易，不重复扣费
    let again = ledger.commit(&token, dec!(0.0075), &commit_details("SM123")).await.unwrap();
    assert_eq!(again.id, transaction.id);
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(0.9925)));

    // 已提交的预留不能再被释放
    assert!(!ledger.release(&token, "late failure").await.unwrap());
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(0.9925)));
}

#[tokio::test]
async fn test_commit_with_lower_final_amount_credits_difference() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(10)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());

    let token = ledger.reserve(&client_id, dec!(2), &details()).await.unwrap();
    let transaction = ledger.commit(&token, dec!(0.5), &commit_details("SM1")).await.unwrap();
    assert_eq!(transaction.cost_units, 5000);
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(9.5)));

    // 超出预留额时按预留额封顶
    let token = ledger.reserve(&client_id, dec!(1), &details()).await.unwrap();
    let transaction = ledger.commit(&token, dec!(3), &commit_details("SM2")).await.unwrap();
    assert_eq!(transaction.cost_units, 10000);
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(8.5)));
}

#[tokio::test]
async fn test_commit_after_release_is_rejected() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(10)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());

    let token = ledger.reserve(&client_id, dec!(1), &details()).await.unwrap();
    ledger.release(&token, "reservation expired").await.unwrap();

    let err = ledger.commit(&token, dec!(1), &commit_details("SM9")).await.unwrap_err();
    assert_eq!(err.kind(), "reservation_settled");
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(10)));
}

#[tokio::test]
async fn test_refund_happens_exactly_once() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(1)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());

    let token = ledger.reserve(&client_id, dec!(0.25), &details()).await.unwrap();

    // pending 状态不能退款
    assert!(!ledger.refund(&token.transaction_id, "undelivered").await.unwrap());

    ledger.commit(&token, dec!(0.25), &commit_details("SM7")).await.unwrap();
    assert!(ledger.refund(&token.transaction_id, "undelivered").await.unwrap());
    assert!(!ledger.refund(&token.transaction_id, "undelivered").await.unwrap());

    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(1)));
    let transaction = get_transaction_by_id(&pool, &token.transaction_id).await.unwrap().unwrap();
    assert_eq!(transaction.status(), Some(TransactionStatus::Refunded));
}

#[tokio::test]
async fn test_credit_tops_up_balance() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(1)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());

    assert_eq!(ledger.credit(&client_id, dec!(24.5)).await.unwrap(), dec!(25.5));
    assert!(ledger.credit(&client_id, dec!(-3)).await.is_err());
    assert!(ledger.credit("missing", dec!(3)).await.is_err());
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(25.5)));
}

#[tokio::test]
async fn test_out_of_range_amounts_are_invalid_requests() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(1)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());

    // 超出存储范围的金额按请求错误返回，不会溢出
    for amount in [Decimal::MAX, dec!(1_000_000_000_000_000)] {
        let err = ledger.credit(&client_id, amount).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
        let err = ledger.reserve(&client_id, amount, &details()).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(1)));
    println!("✅ Oversized amounts rejected");
}

#[tokio::test]
async fn test_release_expired_only_touches_stale_pending() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(10)).await;
    let ledger = BillingLedger::new(pool.clone(), LedgerConfig::default());

    let stale = ledger.reserve(&client_id, dec!(1), &details()).await.unwrap();
    let fresh = ledger.reserve(&client_id, dec!(2), &details()).await.unwrap();
    let committed = ledger.reserve(&client_id, dec!(3), &details()).await.unwrap();
    ledger.commit(&committed, dec!(3), &commit_details("SM-c")).await.unwrap();

    sqlx::query("UPDATE transactions SET created_at = datetime('now', '-1 hour') WHERE id IN (?, ?)")
        .bind(&stale.transaction_id)
        .bind(&committed.transaction_id)
        .execute(&pool)
        .await
        .unwrap();

    let released = ledger.release_expired(Duration::from_secs(600)).await.unwrap();
    assert_eq!(released, 1);
    assert_eq!(ledger.balance(&client_id).await.unwrap(), Some(dec!(5)));

    let fresh = get_transaction_by_id(&pool, &fresh.transaction_id).await.unwrap().unwrap();
    assert_eq!(fresh.status(), Some(TransactionStatus::Pending));
    let stale = get_transaction_by_id(&pool, &stale.transaction_id).await.unwrap().unwrap();
    assert_eq!(stale.failure_reason.as_deref(), Some("reservation expired"));
}

#[tokio::test]
async fn test_lock_contention_surfaces_as_transient_error() {
    let pool = setup_pool_with_busy_timeout(Duration::from_millis(50)).await;
    let client_id = seed_client(&pool, dec!(10)).await;
    let ledger = BillingLedger::new(
        pool.clone(),
        LedgerConfig {
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
        },
    );

    println!("=== Holding the write lock from another connection ===");
    let mut blocker = pool.acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *blocker).await.unwrap();

    let err = ledger.reserve(&client_id, dec!(1), &details()).await.unwrap_err();
    assert_eq!(
        err,
        RelayError::Billing(BillingError::LedgerContention {
            client_id: client_id.clone(),
            attempts: 3,
        })
    );
    assert_eq!(err.status_code(), 503);

    sqlx::query("ROLLBACK").execute(&mut *blocker).await.unwrap();
    drop(blocker);

    let token = ledger.reserve(&client_id, dec!(1), &details()).await.unwrap();
    assert_eq!(token.balance_after, dec!(9));
    println!("✅ Contention reported as 503 and cleared after lock release");
}
