//! 幂等守卫
//!
//! 以订单号为幂等键：已有记录时直接返回该记录对应的结果，不重复执行任何副作用。

use std::sync::Arc;
use tracing::{debug, warn};

use super::dto::ConsumeResult;
use crate::error::ConsumeError;
use crate::models::RecordType;
use crate::repository::RecordStore;

pub struct IdempotencyGuard {
    records: Arc<dyn RecordStore>,
}

impl IdempotencyGuard {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// 查找订单号对应的既有结果
    ///
    /// 查询失败时放行（视为无既有结果），重复扣款由插入时的唯一约束兜底。
    /// 订单号已被其他类型的交易占用时返回 `DUPLICATE_ORDER` 失败结果。
    pub async fn resolve(&self, order_no: &str, expected: RecordType) -> Option<ConsumeResult> {
        match self.records.find_by_order_no(order_no).await {
            Ok(Some(record)) if record.record_type == expected => {
                debug!(order_no = %order_no, status = ?record.status, "重复请求，返回既有结果");
                Some(ConsumeResult::from_record(&record))
            }
            Ok(Some(record)) => {
                warn!(
                    order_no = %order_no,
                    existing = ?record.record_type,
                    expected = ?expected,
                    "订单号已被其他类型交易占用"
                );
                Some(ConsumeResult::failure(
                    order_no,
                    record.person_id,
                    &ConsumeError::DuplicateOrder(order_no.to_string()),
                ))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(order_no = %order_no, error = %e, "幂等查询失败，按新请求处理");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, ConsumeRecord};
    use crate::repository::MockRecordStore;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn record(record_type: RecordType) -> ConsumeRecord {
        let mut account = Account::open(3, Decimal::ZERO);
        account.balance = dec!(100.00);
        ConsumeRecord::committed(record_type, "ORDER-1", &account, dec!(10.00), dec!(90.00), Utc::now())
    }

    #[tokio::test]
    async fn test_resolve_returns_prior_result() {
        let mut store = MockRecordStore::new();
        store
            .expect_find_by_order_no()
            .returning(|_| Ok(Some(record(RecordType::Consume))));

        let guard = IdempotencyGuard::new(Arc::new(store));
        let prior = guard.resolve("ORDER-1", RecordType::Consume).await.unwrap();
        assert!(prior.success);
        assert_eq!(prior.balance_after, Some(dec!(90.00)));
    }

    #[tokio::test]
    async fn test_resolve_type_mismatch_is_duplicate() {
        let mut store = MockRecordStore::new();
        store
            .expect_find_by_order_no()
            .returning(|_| Ok(Some(record(RecordType::Recharge))));

        let guard = IdempotencyGuard::new(Arc::new(store));
        let prior = guard.resolve("ORDER-1", RecordType::Consume).await.unwrap();
        assert!(!prior.success);
        assert_eq!(prior.error_code.as_deref(), Some("DUPLICATE_ORDER"));
    }

    #[tokio::test]
    async fn test_resolve_fails_open() {
        let mut store = MockRecordStore::new();
        store
            .expect_find_by_order_no()
            .returning(|_| Err(ConsumeError::Database(sqlx::Error::PoolTimedOut)));

        let guard = IdempotencyGuard::new(Arc::new(store));
        assert!(guard.resolve("ORDER-1", RecordType::Consume).await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_absent() {
        let mut store = MockRecordStore::new();
        store.expect_find_by_order_no().returning(|_| Ok(None));

        let guard = IdempotencyGuard::new(Arc::new(store));
        assert!(guard.resolve("ORDER-2", RecordType::Consume).await.is_none());
    }
}
