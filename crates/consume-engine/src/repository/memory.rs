//! 内存仓储实现
//!
//! 语义与 PostgreSQL 实现一致（CAS、订单号唯一、退款原子标记），
//! 用于测试和单机嵌入。记录仓储带故障注入开关。

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use super::traits::{AccountStore, LimitPolicyStore, RecordStore};
use crate::error::{ConsumeError, Result};
use crate::models::{Account, AccountStatus, ConsumeRecord, LimitPolicy, LimitScope, RecordQuery};

/// 内存账户仓储
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: DashMap<i64, Account>,
    next_id: AtomicI64,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入账户（保留给定的余额与版本），返回分配了 ID 的账户
    pub fn seed(&self, mut account: Account) -> Account {
        if account.account_id == 0 {
            account.account_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        }
        self.accounts.insert(account.account_id, account.clone());
        account
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get(&self, account_id: i64) -> Result<Option<Account>> {
        Ok(self.accounts.get(&account_id).map(|a| a.clone()))
    }

    async fn get_by_person(&self, person_id: i64) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .iter()
            .find(|a| a.person_id == person_id)
            .map(|a| a.clone()))
    }

    async fn create(&self, account: &Account) -> Result<Account> {
        let mut account = account.clone();
        account.account_id = 0;
        Ok(self.seed(account))
    }

    async fn compare_and_swap_balance(
        &self,
        account_id: i64,
        expected_version: i64,
        new_balance: Decimal,
    ) -> Result<bool> {
        match self.accounts.get_mut(&account_id) {
            Some(mut account) if account.version == expected_version => {
                account.balance = new_balance;
                account.version += 1;
                account.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_status(&self, account_id: i64, status: AccountStatus) -> Result<()> {
        if let Some(mut account) = self.accounts.get_mut(&account_id) {
            account.status = status;
        }
        Ok(())
    }
}

/// 内存交易记录仓储
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, ConsumeRecord>>,
    next_id: AtomicI64,
    fail_all_inserts: AtomicBool,
    fail_next_inserts: AtomicU32,
    fail_lookups: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后所有插入都失败（模拟存储故障）
    pub fn fail_inserts(&self, enabled: bool) {
        self.fail_all_inserts.store(enabled, Ordering::SeqCst);
    }

    /// 接下来的 n 次插入失败
    pub fn fail_next_inserts(&self, n: u32) {
        self.fail_next_inserts.store(n, Ordering::SeqCst);
    }

    /// 按订单号查询失败
    pub fn fail_lookups(&self, enabled: bool) {
        self.fail_lookups.store(enabled, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn should_fail_insert(&self) -> bool {
        if self.fail_all_inserts.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn store(&self, records: &mut HashMap<String, ConsumeRecord>, record: &ConsumeRecord) -> ConsumeRecord {
        let mut stored = record.clone();
        stored.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        records.insert(stored.order_no.clone(), stored.clone());
        stored
    }
}

fn storage_failure() -> ConsumeError {
    ConsumeError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<ConsumeRecord>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(storage_failure());
        }
        Ok(self.records.read().get(order_no).cloned())
    }

    async fn insert(&self, record: &ConsumeRecord) -> Result<ConsumeRecord> {
        if self.should_fail_insert() {
            return Err(storage_failure());
        }
        let mut records = self.records.write();
        if records.contains_key(&record.order_no) {
            return Err(ConsumeError::DuplicateOrder(record.order_no.clone()));
        }
        Ok(self.store(&mut records, record))
    }

    async fn list(&self, query: &RecordQuery) -> Result<Vec<ConsumeRecord>> {
        let mut matched: Vec<ConsumeRecord> = self
            .records
            .read()
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.pay_time.cmp(&a.pay_time).then(b.id.cmp(&a.id)));
        if let Some(limit) = query.limit {
            matched.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(matched)
    }

    async fn insert_refund(
        &self,
        refund: &ConsumeRecord,
        original_order_no: &str,
        reason: &str,
    ) -> Result<ConsumeRecord> {
        if self.should_fail_insert() {
            return Err(storage_failure());
        }
        let mut records = self.records.write();
        if records.contains_key(&refund.order_no) {
            return Err(ConsumeError::DuplicateOrder(refund.order_no.clone()));
        }
        match records.get_mut(original_order_no) {
            None => return Err(ConsumeError::OrderNotFound(original_order_no.to_string())),
            Some(original) if original.refunded => {
                return Err(ConsumeError::AlreadyRefunded(original_order_no.to_string()));
            }
            Some(original) => {
                original.refunded = true;
                original.refund_time = Some(refund.pay_time);
                original.refund_reason = Some(reason.to_string());
            }
        }
        Ok(self.store(&mut records, refund))
    }
}

/// 内存限额策略仓储
#[derive(Debug, Default)]
pub struct MemoryLimitPolicyStore {
    policies: DashMap<(LimitScope, String), LimitPolicy>,
}

impl MemoryLimitPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LimitPolicyStore for MemoryLimitPolicyStore {
    async fn list_by_scope(&self, scope: LimitScope, target: &str) -> Result<Vec<LimitPolicy>> {
        Ok(self
            .policies
            .get(&(scope, target.to_string()))
            .filter(|p| p.enabled)
            .map(|p| vec![p.clone()])
            .unwrap_or_default())
    }

    async fn upsert(&self, policy: &LimitPolicy) -> Result<()> {
        self.policies
            .insert((policy.scope, policy.target.clone()), policy.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordStatus, RecordType};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn account() -> Account {
        let mut account = Account::open(1, Decimal::ZERO);
        account.balance = dec!(100.00);
        account
    }

    fn consume(account: &Account, order_no: &str, amount: Decimal) -> ConsumeRecord {
        ConsumeRecord::committed(
            RecordType::Consume,
            order_no,
            account,
            amount,
            account.balance - amount,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_account_cas() {
        let store = MemoryAccountStore::new();
        let acc = store.seed(account());

        assert!(store.compare_and_swap_balance(acc.account_id, 0, dec!(70.00)).await.unwrap());
        assert!(!store.compare_and_swap_balance(acc.account_id, 0, dec!(40.00)).await.unwrap());

        let reloaded = store.get(acc.account_id).await.unwrap().unwrap();
        assert_eq!(reloaded.balance, dec!(70.00));
        assert_eq!(reloaded.version, 1);
        assert_eq!(
            store.get_by_person(1).await.unwrap().map(|a| a.account_id),
            Some(acc.account_id)
        );
    }

    #[tokio::test]
    async fn test_record_insert_rejects_duplicate_order() {
        let store = MemoryRecordStore::new();
        let acc = account();
        store.insert(&consume(&acc, "CONSUME-1", dec!(10))).await.unwrap();

        let err = store.insert(&consume(&acc, "CONSUME-1", dec!(10))).await.unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_ORDER");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_inserts_counts_down() {
        let store = MemoryRecordStore::new();
        let acc = account();
        store.fail_next_inserts(1);

        assert!(store.insert(&consume(&acc, "A", dec!(1))).await.is_err());
        assert!(store.insert(&consume(&acc, "A", dec!(1))).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_with_limit() {
        let store = MemoryRecordStore::new();
        let acc = account();
        let now = Utc::now();
        for (i, order) in ["A", "B", "C"].iter().enumerate() {
            let mut record = consume(&acc, order, dec!(1));
            record.pay_time = now + Duration::seconds(i as i64);
            store.insert(&record).await.unwrap();
        }

        let records = store
            .list(&RecordQuery::successful_consumes(1).limit(2))
            .await
            .unwrap();
        let orders: Vec<&str> = records.iter().map(|r| r.order_no.as_str()).collect();
        assert_eq!(orders, vec!["C", "B"]);
    }

    #[tokio::test]
    async fn test_refund_marks_original_once() {
        let store = MemoryRecordStore::new();
        let acc = account();
        store.insert(&consume(&acc, "CONSUME-9", dec!(30))).await.unwrap();

        let mut refund = consume(&acc, "REFUND-9", dec!(30));
        refund.record_type = RecordType::Refund;
        refund.status = RecordStatus::Success;
        store.insert_refund(&refund, "CONSUME-9", "退菜").await.unwrap();

        let original = store.find_by_order_no("CONSUME-9").await.unwrap().unwrap();
        assert!(original.refunded);
        assert_eq!(original.refund_reason.as_deref(), Some("退菜"));

        refund.order_no = "REFUND-10".to_string();
        let err = store.insert_refund(&refund, "CONSUME-9", "again").await.unwrap_err();
        assert_eq!(err.error_code(), "ALREADY_REFUNDED");

        refund.order_no = "REFUND-11".to_string();
        let err = store.insert_refund(&refund, "MISSING", "x").await.unwrap_err();
        assert_eq!(err.error_code(), "ORDER_NOT_FOUND");
    }
}
