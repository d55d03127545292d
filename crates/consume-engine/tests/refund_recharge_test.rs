//! 充值、退款与对账集成测试

mod common;

use common::{PERSON, engine};
use consume_engine::{
    AccountStatus, AccountStore, ConsumeRequest, RechargeRequest, RecordStore, RecordType,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_refund_credits_balance_and_leaves_statistics() {
    let t = engine();
    t.seed_account(dec!(100.00));
    let consumed = t
        .engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(40.00)).with_order_no("ORDER-R1"))
        .await;
    assert!(consumed.success);
    assert_eq!(t.engine.statistics(PERSON).await.daily_amount, dec!(40.00));

    let refund = t.engine.refund("ORDER-R1", "商品缺货").await;
    assert!(refund.success, "{:?}", refund);
    assert!(refund.order_no.starts_with("REFUND"));
    assert_eq!(refund.amount, Some(dec!(40.00)));
    assert_eq!(refund.balance_before, Some(dec!(60.00)));
    assert_eq!(refund.balance_after, Some(dec!(100.00)));
    assert_eq!(t.balance(PERSON).await, dec!(100.00));

    let original = t.records.find_by_order_no("ORDER-R1").await.unwrap().unwrap();
    assert!(original.refunded);
    assert_eq!(original.refund_reason.as_deref(), Some("商品缺货"));

    let refund_record = t
        .records
        .find_by_order_no(&refund.order_no)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refund_record.record_type, RecordType::Refund);
    assert_eq!(
        refund_record.audit().unwrap().refund_of.as_deref(),
        Some("ORDER-R1")
    );

    let stats = t.engine.statistics(PERSON).await;
    assert_eq!(stats.daily_amount, Decimal::ZERO);
    assert_eq!(stats.daily_count, 0);
}

#[tokio::test]
async fn test_second_refund_is_rejected() {
    let t = engine();
    t.seed_account(dec!(100.00));
    t.engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(40.00)).with_order_no("ORDER-R2"))
        .await;

    assert!(t.engine.refund("ORDER-R2", "first").await.success);
    let again = t.engine.refund("ORDER-R2", "second").await;
    assert_eq!(again.error_code.as_deref(), Some("ALREADY_REFUNDED"));
    assert_eq!(again.order_no, "ORDER-R2");
    assert_eq!(again.person_id, PERSON);
    assert_eq!(t.balance(PERSON).await, dec!(100.00));
}

#[tokio::test]
async fn test_refund_rejects_unknown_and_non_consume_orders() {
    let t = engine();
    t.seed_account(dec!(100.00));

    let missing = t.engine.refund("ORDER-NONE", "x").await;
    assert_eq!(missing.error_code.as_deref(), Some("ORDER_NOT_FOUND"));
    assert_eq!(missing.person_id, 0);

    let recharge = t
        .engine
        .recharge(RechargeRequest::new(PERSON, dec!(10.00)).with_order_no("TOPUP-R"))
        .await;
    assert!(recharge.success);
    let refund_recharge = t.engine.refund("TOPUP-R", "x").await;
    assert_eq!(refund_recharge.error_code.as_deref(), Some("INVALID_PARAM"));
    assert_eq!(refund_recharge.person_id, PERSON);
    assert_eq!(t.balance(PERSON).await, dec!(110.00));
}

#[tokio::test]
async fn test_refund_storage_failure_restores_balance() {
    let t = engine();
    t.seed_account(dec!(100.00));
    t.engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(40.00)).with_order_no("ORDER-R3"))
        .await;

    t.records.fail_next_inserts(1);
    let failed = t.engine.refund("ORDER-R3", "x").await;
    assert_eq!(failed.error_code.as_deref(), Some("RECORD_PERSISTENCE_FAILED"));
    assert_eq!(failed.order_no, "ORDER-R3");
    assert_eq!(t.balance(PERSON).await, dec!(60.00));

    let retried = t.engine.refund("ORDER-R3", "x").await;
    assert!(retried.success, "{:?}", retried);
    assert_eq!(t.balance(PERSON).await, dec!(100.00));
}

#[tokio::test]
async fn test_recharge_is_idempotent() {
    let t = engine();
    t.seed_account(dec!(0.00));
    let request = RechargeRequest::new(PERSON, dec!(88.80)).with_order_no("TOPUP-1");

    let first = t.engine.recharge(request.clone()).await;
    let second = t.engine.recharge(request).await;

    assert!(first.success, "{:?}", first);
    assert_eq!(first, second);
    assert_eq!(t.balance(PERSON).await, dec!(88.80));
    assert_eq!(t.records.len(), 1);

    // 充值不计入消费统计
    assert_eq!(t.engine.statistics(PERSON).await.daily_count, 0);
}

#[tokio::test]
async fn test_recharge_allowed_on_frozen_but_not_closed_account() {
    let t = engine();
    t.seed_account(dec!(0.00));

    t.engine
        .set_account_status(PERSON, AccountStatus::Frozen)
        .await
        .unwrap();
    let frozen = t
        .engine
        .recharge(RechargeRequest::new(PERSON, dec!(10.00)))
        .await;
    assert!(frozen.success, "{:?}", frozen);

    t.engine
        .set_account_status(PERSON, AccountStatus::Closed)
        .await
        .unwrap();
    let closed = t
        .engine
        .recharge(RechargeRequest::new(PERSON, dec!(10.00)))
        .await;
    assert_eq!(closed.error_code.as_deref(), Some("ACCOUNT_INACTIVE"));
    assert_eq!(t.balance(PERSON).await, dec!(10.00));
}

#[tokio::test]
async fn test_order_numbers_are_typed_by_operation() {
    let t = engine();
    t.seed_account(dec!(0.00));

    let recharge = t
        .engine
        .recharge(RechargeRequest::new(PERSON, dec!(10.00)))
        .await;
    assert!(recharge.order_no.starts_with("RECHARGE20240306120000"));
    assert_eq!(recharge.order_no.len(), "RECHARGE".len() + 14 + 8);
}

#[tokio::test]
async fn test_open_account_and_verify_consistency() {
    let t = engine();
    let account = t.engine.open_account(PERSON, Decimal::ZERO).await.unwrap();
    assert_eq!(account.balance, dec!(0.00));
    assert_eq!(
        t.engine
            .open_account(PERSON, Decimal::ZERO)
            .await
            .unwrap_err()
            .error_code(),
        "INVALID_PARAM"
    );

    t.engine
        .recharge(RechargeRequest::new(PERSON, dec!(200.00)))
        .await;
    t.engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(75.50)).with_order_no("ORDER-V1"))
        .await;
    t.engine.refund("ORDER-V1", "x").await;
    t.engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(20.00)))
        .await;

    let report = t.engine.verify_consistency(PERSON).await.unwrap();
    assert!(report.consistent, "{:?}", report);
    assert_eq!(report.record_count, 4);
    assert_eq!(report.balance, dec!(180.00));
    assert_eq!(report.drift, Some(dec!(0.00)));
}

#[tokio::test]
async fn test_verify_detects_drift() {
    let t = engine();
    t.seed_account(dec!(100.00));
    t.engine
        .process_consume(ConsumeRequest::new(PERSON, dec!(10.00)))
        .await;

    // 绕过引擎直接改余额
    let account = t.accounts.get_by_person(PERSON).await.unwrap().unwrap();
    assert!(
        t.accounts
            .compare_and_swap_balance(account.account_id, account.version, dec!(95.00))
            .await
            .unwrap()
    );

    let report = t.engine.verify_consistency(PERSON).await.unwrap();
    assert!(!report.consistent);
    assert_eq!(report.drift, Some(dec!(5.00)));
}
