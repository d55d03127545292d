//! 仓储 Trait 定义
//!
//! 服务层只依赖这些窄接口：按主键读取、条件更新与插入，
//! 持久化技术可替换，测试使用内存实现或 mock。

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{Account, AccountStatus, ConsumeRecord, LimitPolicy, LimitScope, RecordQuery};

/// 账户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, account_id: i64) -> Result<Option<Account>>;
    async fn get_by_person(&self, person_id: i64) -> Result<Option<Account>>;
    async fn create(&self, account: &Account) -> Result<Account>;

    /// 版本号匹配时更新余额并将版本号加一
    ///
    /// 返回 false 表示版本已被其他写入者修改，调用方不应静默重试。
    async fn compare_and_swap_balance(
        &self,
        account_id: i64,
        expected_version: i64,
        new_balance: Decimal,
    ) -> Result<bool>;

    async fn update_status(&self, account_id: i64, status: AccountStatus) -> Result<()>;
}

/// 交易记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<ConsumeRecord>>;

    /// 插入记录，订单号冲突时返回 `DuplicateOrder`
    async fn insert(&self, record: &ConsumeRecord) -> Result<ConsumeRecord>;

    /// 按条件查询，pay_time、id 倒序
    async fn list(&self, query: &RecordQuery) -> Result<Vec<ConsumeRecord>>;

    /// 原子地写入退款记录并标记原消费已退款
    ///
    /// 原订单不存在返回 `OrderNotFound`，已退款返回 `AlreadyRefunded`。
    async fn insert_refund(
        &self,
        refund: &ConsumeRecord,
        original_order_no: &str,
        reason: &str,
    ) -> Result<ConsumeRecord>;
}

/// 限额策略仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LimitPolicyStore: Send + Sync {
    /// 某作用域目标下启用的策略，优先级倒序
    async fn list_by_scope(&self, scope: LimitScope, target: &str) -> Result<Vec<LimitPolicy>>;

    /// 按 (scope, target) 新增或覆盖
    async fn upsert(&self, policy: &LimitPolicy) -> Result<()>;
}
