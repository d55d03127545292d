//! 消费主流程集成测试：内存仓储 + 内存缓存 + 手动时钟

mod common;

use chrono::TimeDelta;
use common::{DenyDevice, FixedPassword, PERSON, builder, engine, fast_retry};
use consume_engine::{
    AccountStatus, ConsumeRequest, RechargeRequest, RecordStatus, RecordStore, RiskLevel, cache_keys,
};
use consume_shared::retry::Retryable;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_consume_recharge_and_daily_limit_scenario() {
    let t = engine();
    t.seed_account(dec!(200.00));

    let first = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(150.00)).with_order_no("ORDER-1"))
        .await;
    assert!(first.success, "{:?}", first);
    assert_eq!(first.status, RecordStatus::Success);
    assert_eq!(first.balance_before, Some(dec!(200.00)));
    assert_eq!(first.balance_after, Some(dec!(50.00)));
    assert_eq!(first.remaining_daily, Some(dec!(350.00)));
    assert_eq!(first.risk_level, RiskLevel::Safe);

    let recharge = t
        .engine
        .recharge(RechargeRequest::new(PERSON, dec!(100.00)).with_order_no("TOPUP-1"))
        .await;
    assert!(recharge.success, "{:?}", recharge);
    assert_eq!(recharge.balance_after, Some(dec!(150.00)));

    let second = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(100.00)).with_order_no("ORDER-2"))
        .await;
    assert!(second.success, "{:?}", second);
    assert_eq!(second.balance_after, Some(dec!(50.00)));
    assert_eq!(second.remaining_daily, Some(dec!(250.00)));

    // 日累计 250 + 300 = 550 超过默认日限额 500
    let rejected = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(300.00)).with_order_no("ORDER-3"))
        .await;
    assert!(!rejected.success);
    assert_eq!(rejected.status, RecordStatus::Failed);
    assert_eq!(rejected.error_code.as_deref(), Some("DAILY_LIMIT_EXCEEDED"));
    assert_eq!(
        rejected.message.as_deref(),
        Some("超过日累计限额: 限额 500.00, 累计将达 550.00")
    );
    assert_eq!(rejected.balance_after, None);
    assert_eq!(t.balance(PERSON).await, dec!(50.00));

    let stats = t.engine.statistics(PERSON).await;
    assert_eq!(stats.daily_amount, dec!(250.00));
    assert_eq!(stats.daily_count, 2);
}

#[tokio::test]
async fn test_replay_returns_identical_result() {
    let t = engine();
    t.seed_account(dec!(100.00));
    let request = ConsumeRequest::new(PERSON, dec!(12.34)).with_order_no("ORDER-REPLAY");

    let first = t.engine.process_consume(request.clone()).await;
    let second = t.engine.process_consume(request).await;

    assert!(first.success);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(t.records.len(), 1);
    assert_eq!(t.balance(PERSON).await, dec!(87.66));
}

#[tokio::test]
async fn test_replay_with_different_amount_still_returns_first_result() {
    let t = engine();
    t.seed_account(dec!(100.00));

    let first = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(10.00)).with_order_no("ORDER-X"))
        .await;
    let second = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(99.00)).with_order_no("ORDER-X"))
        .await;

    assert_eq!(first, second);
    assert_eq!(second.amount, Some(dec!(10.00)));
    assert_eq!(t.balance(PERSON).await, dec!(90.00));
}

#[tokio::test]
async fn test_record_failure_restores_balance_and_retry_succeeds() {
    let t = engine();
    t.seed_account(dec!(100.00));
    t.records.fail_next_inserts(1);
    let request = ConsumeRequest::new(PERSON, dec!(30.00)).with_order_no("ORDER-COMP");

    let failed = t.engine.process_consume(request.clone()).await;
    assert!(!failed.success);
    assert_eq!(failed.error_code.as_deref(), Some("RECORD_PERSISTENCE_FAILED"));
    assert!(failed.is_retryable());
    assert_eq!(t.balance(PERSON).await, dec!(100.00));
    assert!(t.records.is_empty());

    let retried = t.engine.process_consume(request).await;
    assert!(retried.success, "{:?}", retried);
    assert_eq!(retried.balance_before, Some(dec!(100.00)));
    assert_eq!(retried.balance_after, Some(dec!(70.00)));
    assert_eq!(t.balance(PERSON).await, dec!(70.00));

    let report = t.engine.verify_consistency(PERSON).await.unwrap();
    assert!(report.consistent, "{:?}", report);
}

#[tokio::test]
async fn test_consume_with_retry_recovers_from_transient_failures() {
    let t = engine();
    t.seed_account(dec!(100.00));
    t.records.fail_next_inserts(2);

    let result = t
        .engine
        .process_consume_with_retry(ConsumeRequest::new(PERSON, dec!(30.00)), &fast_retry(3))
        .await;

    assert!(result.success, "{:?}", result);
    assert!(result.order_no.starts_with("CONSUME"));
    assert_eq!(result.balance_after, Some(dec!(70.00)));
    assert_eq!(t.records.len(), 1);
}

#[tokio::test]
async fn test_consume_with_retry_gives_up_after_budget() {
    let t = engine();
    t.seed_account(dec!(100.00));
    t.records.fail_inserts(true);

    let result = t
        .engine
        .process_consume_with_retry(
            ConsumeRequest::new(PERSON, dec!(30.00)).with_order_no("ORDER-GIVEUP"),
            &fast_retry(2),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.order_no, "ORDER-GIVEUP");
    assert_eq!(result.error_code.as_deref(), Some("RECORD_PERSISTENCE_FAILED"));
    assert_eq!(t.balance(PERSON).await, dec!(100.00));
}

#[tokio::test]
async fn test_business_rejection_is_not_retried() {
    let t = engine();
    t.seed_account(dec!(10.00));

    let result = t
        .engine
        .process_consume_with_retry(ConsumeRequest::new(PERSON, dec!(30.00)), &fast_retry(3))
        .await;

    assert_eq!(result.error_code.as_deref(), Some("INSUFFICIENT_BALANCE"));
    assert!(t.records.is_empty());
}

#[tokio::test]
async fn test_freeze_blocks_until_unfrozen() {
    let t = engine();
    t.seed_account(dec!(100.00));
    t.engine
        .freeze(PERSON, "人工冻结", TimeDelta::hours(1))
        .await
        .unwrap();

    let blocked = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(10.00)))
        .await;
    assert_eq!(blocked.error_code.as_deref(), Some("ACCOUNT_FROZEN"));
    assert_eq!(blocked.message.as_deref(), Some("账户已冻结: 人工冻结"));
    assert_eq!(t.balance(PERSON).await, dec!(100.00));

    t.engine.unfreeze(PERSON).await.unwrap();
    assert!(t.engine.freeze_info(PERSON).await.unwrap().is_none());

    let allowed = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(10.00)))
        .await;
    assert!(allowed.success, "{:?}", allowed);
}

#[tokio::test]
async fn test_freeze_expires_with_clock() {
    let t = engine();
    t.seed_account(dec!(100.00));
    t.engine
        .freeze(PERSON, "临时冻结", TimeDelta::hours(1))
        .await
        .unwrap();

    t.clock.advance(TimeDelta::hours(2));

    assert!(t.engine.freeze_info(PERSON).await.unwrap().is_none());
    let result = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(10.00)))
        .await;
    assert!(result.success, "{:?}", result);
}

#[tokio::test]
async fn test_inactive_and_missing_accounts_are_rejected() {
    let t = engine();
    t.seed_account(dec!(100.00));
    t.engine
        .set_account_status(PERSON, AccountStatus::Frozen)
        .await
        .unwrap();

    let inactive = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(10.00)))
        .await;
    assert_eq!(inactive.error_code.as_deref(), Some("ACCOUNT_INACTIVE"));

    let missing = t
        .engine
        .process_consume(ConsumeRequest::new(9999, dec!(10.00)))
        .await;
    assert_eq!(missing.error_code.as_deref(), Some("ACCOUNT_NOT_FOUND"));
    assert_eq!(missing.person_id, 9999);
    assert!(t.records.is_empty());
}

#[tokio::test]
async fn test_invalid_request_touches_nothing() {
    let t = engine();
    t.seed_account(dec!(100.00));

    let result = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(-5)).with_order_no("ORDER-BAD"))
        .await;

    assert_eq!(result.error_code.as_deref(), Some("INVALID_PARAM"));
    assert_eq!(result.order_no, "ORDER-BAD");
    assert!(t.records.is_empty());
    assert!(t.cache.is_empty());
}

#[tokio::test]
async fn test_permission_denied_by_device() {
    let t = builder().permissions(DenyDevice("POS-X")).build();
    t.seed_account(dec!(100.00));

    let denied = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(10.00)).with_device("POS-X"))
        .await;
    assert_eq!(denied.error_code.as_deref(), Some("PERMISSION_DENIED"));
    assert_eq!(denied.message.as_deref(), Some("无消费权限: 设备 POS-X 未授权"));

    let allowed = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(10.00)).with_device("POS-1"))
        .await;
    assert!(allowed.success, "{:?}", allowed);
    assert_eq!(t.records.len(), 1);
}

#[tokio::test]
async fn test_password_required_above_free_limit() {
    let t = builder()
        .configure(|config| config.password_free_limit = Some(dec!(50)))
        .passwords(FixedPassword {
            password: "123456",
            remaining: 2,
        })
        .build();
    t.seed_account(dec!(500.00));

    let small = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(30.00)))
        .await;
    assert!(small.success, "{:?}", small);

    let missing = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(100.00)))
        .await;
    assert_eq!(missing.error_code.as_deref(), Some("PAYMENT_PASSWORD_REQUIRED"));

    let wrong = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(100.00)).with_password("000000"))
        .await;
    assert_eq!(wrong.error_code.as_deref(), Some("PASSWORD_INCORRECT"));
    assert_eq!(wrong.message.as_deref(), Some("支付密码错误: 还可尝试 2 次"));

    let correct = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(100.00)).with_password("123456"))
        .await;
    assert!(correct.success, "{:?}", correct);
    assert_eq!(t.balance(PERSON).await, dec!(370.00));
}

#[tokio::test]
async fn test_explicit_password_requirement() {
    let t = builder()
        .passwords(FixedPassword {
            password: "123456",
            remaining: 4,
        })
        .build();
    t.seed_account(dec!(100.00));

    let result = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(1.00)).requiring_password())
        .await;
    assert_eq!(result.error_code.as_deref(), Some("PAYMENT_PASSWORD_REQUIRED"));
}

#[tokio::test]
async fn test_query_consume_result() {
    let t = engine();
    t.seed_account(dec!(100.00));

    let result = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(25.00)).with_order_no("ORDER-Q"))
        .await;
    let queried = t.engine.query_consume_result("ORDER-Q").await.unwrap();
    assert_eq!(queried, result);

    let missing = t.engine.query_consume_result("ORDER-NONE").await.unwrap_err();
    assert_eq!(missing.error_code(), "ORDER_NOT_FOUND");
}

#[tokio::test]
async fn test_commit_invalidates_account_and_statistics_cache() {
    let t = engine();
    let account = t.seed_account(dec!(100.00));
    let account_key = cache_keys::account(account.person_id);
    let stats_key = cache_keys::statistics(PERSON, common::noon().date_naive());

    // 预热统计缓存
    let before = t.engine.statistics(PERSON).await;
    assert_eq!(before.daily_count, 0);
    assert!(t.cache.contains(&stats_key));

    let result = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(10.00)))
        .await;
    assert!(result.success);
    assert!(!t.cache.contains(&account_key));
    assert!(!t.cache.contains(&stats_key));

    let after = t.engine.statistics(PERSON).await;
    assert_eq!(after.daily_amount, dec!(10.00));
    assert_eq!(after.daily_count, 1);
}

#[tokio::test]
async fn test_currency_defaults_and_override() {
    let t = engine();
    t.seed_account(dec!(100.00));

    t.engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(1.00)).with_order_no("ORDER-CNY"))
        .await;
    t.engine
        .process_consume(
            ConsumeRequest::new(PERSON, dec!(1.00))
                .with_order_no("ORDER-USD")
                .with_currency("USD"),
        )
        .await;

    let cny = t.records.find_by_order_no("ORDER-CNY").await.unwrap().unwrap();
    let usd = t.records.find_by_order_no("ORDER-USD").await.unwrap().unwrap();
    assert_eq!(cny.currency, "CNY");
    assert_eq!(usd.currency, "USD");
}
