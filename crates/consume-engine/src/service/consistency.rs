//! 一致性协调
//!
//! 余额变更与交易记录写入之间没有共同事务，由协调器保证二者一致：
//!
//! 1. 按账户加互斥锁，锁内重新读取账户
//! 2. 业务闭包基于最新账户计算余额变化与待写记录
//! 3. 版本号 CAS 更新余额，版本不符返回 `CONCURRENT_MODIFICATION`
//! 4. 写入记录；失败时按 CAS 反向补偿余额后返回错误
//! 5. 释放锁并使账户缓存失效

use consume_shared::CacheStore;
use consume_shared::observability::metrics;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::cache_keys;
use crate::error::{ConsumeError, Result};
use crate::lock::LockManager;
use crate::models::{money, Account, ConsumeRecord, RecordQuery, RecordStatus};
use crate::repository::{AccountStore, RecordStore};

/// 补偿 CAS 的最大尝试次数
const COMPENSATION_ATTEMPTS: u32 = 3;

/// 余额变更后需要写入的记录
#[derive(Debug, Clone)]
pub enum RecordWrite {
    Insert(ConsumeRecord),
    /// 写入退款记录并原子标记原消费
    Refund {
        refund: ConsumeRecord,
        original_order_no: String,
        reason: String,
    },
    None,
}

impl RecordWrite {
    fn order_no(&self) -> Option<&str> {
        match self {
            Self::Insert(record) | Self::Refund { refund: record, .. } => Some(&record.order_no),
            Self::None => None,
        }
    }
}

/// 业务闭包的计算结果
#[derive(Debug, Clone)]
pub struct Mutation<T> {
    /// 有符号余额变化，扣款为负
    pub balance_delta: Decimal,
    pub record: RecordWrite,
    pub output: T,
}

/// 提交结果
#[derive(Debug, Clone)]
pub struct Committed<T> {
    /// 提交后的账户
    pub account: Account,
    /// 已持久化的记录
    pub record: Option<ConsumeRecord>,
    pub output: T,
}

/// 账户与流水的一致性核对结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub person_id: i64,
    pub account_id: i64,
    pub balance: Decimal,
    /// 最近一条成功流水的变动后余额
    pub last_record_balance: Option<Decimal>,
    /// 账户余额 - 最近流水余额
    pub drift: Option<Decimal>,
    pub record_count: usize,
    /// 相邻流水 balance_after 与下一条 balance_before 不衔接的次数
    pub broken_links: usize,
    pub consistent: bool,
}

pub struct ConsistencyCoordinator {
    accounts: Arc<dyn AccountStore>,
    records: Arc<dyn RecordStore>,
    cache: Arc<dyn CacheStore>,
    locks: LockManager,
}

impl ConsistencyCoordinator {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        records: Arc<dyn RecordStore>,
        cache: Arc<dyn CacheStore>,
        locks: LockManager,
    ) -> Self {
        Self {
            accounts,
            records,
            cache,
            locks,
        }
    }

    /// 在账户锁内执行一次余额变更
    ///
    /// `mutate` 拿到锁内读取的最新账户，返回的错误原样透出且不产生任何写入。
    #[instrument(skip(self, account, mutate), fields(account_id = account.account_id))]
    pub async fn execute<T, F>(
        &self,
        account: &Account,
        operation: &str,
        mutate: F,
    ) -> Result<Committed<T>>
    where
        F: FnOnce(&Account) -> Result<Mutation<T>>,
    {
        let lock = self.locks.lock_account(account.account_id).await?;

        let (balance_touched, outcome) = self.commit(account, operation, mutate).await;

        if let Err(e) = lock.release().await {
            warn!(error = %e, "释放账户锁失败，等待过期");
        }
        if balance_touched {
            let key = cache_keys::account(account.person_id);
            if let Err(e) = self.cache.delete(&key).await {
                warn!(key = %key, error = %e, "账户缓存失效失败");
            }
        }
        outcome
    }

    /// 返回 (是否改动过余额, 结果)
    async fn commit<T, F>(
        &self,
        snapshot: &Account,
        operation: &str,
        mutate: F,
    ) -> (bool, Result<Committed<T>>)
    where
        F: FnOnce(&Account) -> Result<Mutation<T>>,
    {
        let current = match self.accounts.get(snapshot.account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => return (false, Err(ConsumeError::AccountNotFound(snapshot.person_id))),
            Err(e) => return (false, Err(e)),
        };

        let mutation = match mutate(&current) {
            Ok(mutation) => mutation,
            Err(e) => return (false, Err(e)),
        };

        let delta = mutation.balance_delta;
        let mut after = current.clone();
        if !delta.is_zero() {
            let new_balance = money(current.balance + delta);
            match self
                .accounts
                .compare_and_swap_balance(current.account_id, current.version, new_balance)
                .await
            {
                Ok(true) => {
                    after.balance = new_balance;
                    after.version += 1;
                }
                Ok(false) => {
                    warn!(version = current.version, "账户版本冲突");
                    return (
                        false,
                        Err(ConsumeError::ConcurrentModification {
                            account_id: current.account_id,
                        }),
                    );
                }
                Err(e) => return (false, Err(e)),
            }
        }

        let order_no = mutation.record.order_no().unwrap_or_default().to_string();
        let written = match mutation.record {
            RecordWrite::Insert(record) => self.records.insert(&record).await.map(Some),
            RecordWrite::Refund {
                refund,
                original_order_no,
                reason,
            } => self
                .records
                .insert_refund(&refund, &original_order_no, &reason)
                .await
                .map(Some),
            RecordWrite::None => Ok(None),
        };

        match written {
            Ok(record) => (
                !delta.is_zero(),
                Ok(Committed {
                    account: after,
                    record,
                    output: mutation.output,
                }),
            ),
            Err(e) if delta.is_zero() => (false, Err(e)),
            Err(e) => {
                warn!(order_no = %order_no, error = %e, "记录写入失败，开始补偿余额");
                if let Err(compensation) = self.compensate(current.account_id, delta, operation).await {
                    return (true, Err(compensation));
                }
                let err = if e.is_business_error() {
                    e
                } else {
                    ConsumeError::RecordPersistenceFailed { order_no }
                };
                (true, Err(err))
            }
        }
    }

    /// 反向应用余额变化
    ///
    /// 每次尝试都重新读取账户并按其版本 CAS。
    async fn compensate(&self, account_id: i64, delta: Decimal, operation: &str) -> Result<()> {
        let mut last_error = None;
        for attempt in 1..=COMPENSATION_ATTEMPTS {
            let outcome = match self.accounts.get(account_id).await {
                Ok(Some(account)) => {
                    self.accounts
                        .compare_and_swap_balance(
                            account_id,
                            account.version,
                            money(account.balance - delta),
                        )
                        .await
                }
                Ok(None) => Err(ConsumeError::Internal(format!(
                    "补偿时账户不存在: account_id={}",
                    account_id
                ))),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(true) => {
                    metrics::record_compensation(operation, true);
                    info!(account_id, attempt, %delta, "余额补偿成功");
                    return Ok(());
                }
                Ok(false) => warn!(account_id, attempt, "补偿时版本冲突"),
                Err(e) => {
                    warn!(account_id, attempt, error = %e, "补偿失败");
                    last_error = Some(e.to_string());
                }
            }
        }

        metrics::record_compensation(operation, false);
        error!(account_id, %delta, "余额补偿失败，需要人工处理");
        Err(ConsumeError::Internal(format!(
            "余额补偿失败: account_id={}, delta={}, {}",
            account_id,
            delta,
            last_error.unwrap_or_else(|| "版本冲突".to_string())
        )))
    }

    /// 核对账户余额与成功流水链
    #[instrument(skip(self, account), fields(account_id = account.account_id))]
    pub async fn verify(&self, account: &Account) -> Result<ConsistencyReport> {
        let mut records: Vec<ConsumeRecord> = self
            .records
            .list(&RecordQuery::for_person(account.person_id).with_status(RecordStatus::Success))
            .await?
            .into_iter()
            .filter(|r| r.account_id == account.account_id)
            .collect();
        records.reverse();

        let broken_links = records
            .windows(2)
            .filter(|pair| pair[0].balance_after != pair[1].balance_before)
            .count();
        let last_record_balance = records.last().map(|r| r.balance_after);
        let drift = last_record_balance.map(|last| money(account.balance - last));
        let consistent = broken_links == 0 && drift.is_none_or(|d| d.is_zero());

        if !consistent {
            warn!(?drift, broken_links, "账户与流水不一致");
        }

        Ok(ConsistencyReport {
            person_id: account.person_id,
            account_id: account.account_id,
            balance: account.balance,
            last_record_balance,
            drift,
            record_count: records.len(),
            broken_links,
            consistent,
        })
    }
}
