//! 集成测试公共装配：内存仓储 + 内存缓存 + 手动时钟

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use consume_engine::error::Result;
use consume_engine::service::{
    AllowAllPermissions, PasswordVerification, PaymentPasswordVerifier, PermissionDecision,
    PermissionValidator, UnconfiguredPasswordVerifier,
};
use consume_engine::{
    money, Account, EngineComponents, EngineConfig, ManualClock, MemoryAccountStore,
    MemoryLimitPolicyStore, MemoryRecordStore, MemoryReviewQueue, TransactionEngine,
};
use consume_shared::MemoryCache;
use rust_decimal::Decimal;
use std::sync::Arc;

pub const PERSON: i64 = 1001;

/// 北京时间 2024-03-06（周三）12:00
pub fn noon() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-06T04:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub struct TestEngine {
    pub engine: Arc<TransactionEngine>,
    pub accounts: Arc<MemoryAccountStore>,
    pub records: Arc<MemoryRecordStore>,
    pub policies: Arc<MemoryLimitPolicyStore>,
    pub review_queue: Arc<MemoryReviewQueue>,
    pub cache: MemoryCache,
    pub clock: Arc<ManualClock>,
}

impl TestEngine {
    /// 以给定余额开立 PERSON 的账户
    pub fn seed_account(&self, balance: Decimal) -> Account {
        self.seed_account_for(PERSON, balance)
    }

    pub fn seed_account_for(&self, person_id: i64, balance: Decimal) -> Account {
        let mut account = Account::open(person_id, Decimal::ZERO);
        account.balance = money(balance);
        self.accounts.seed(account)
    }

    pub async fn balance(&self, person_id: i64) -> Decimal {
        use consume_engine::AccountStore;
        self.accounts
            .get_by_person(person_id)
            .await
            .unwrap()
            .unwrap()
            .balance
    }
}

pub struct Builder {
    config: EngineConfig,
    permissions: Arc<dyn PermissionValidator>,
    passwords: Arc<dyn PaymentPasswordVerifier>,
}

/// 默认：同步风险评估，锁等待放宽以适应并发测试
pub fn builder() -> Builder {
    let mut config = EngineConfig::default();
    config.risk.async_assessment = false;
    config.lock.retry_count = 500;
    config.lock.retry_delay_ms = 5;
    Builder {
        config,
        permissions: Arc::new(AllowAllPermissions),
        passwords: Arc::new(UnconfiguredPasswordVerifier),
    }
}

pub fn engine() -> TestEngine {
    builder().build()
}

impl Builder {
    pub fn configure(mut self, f: impl FnOnce(&mut EngineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn permissions(mut self, permissions: impl PermissionValidator + 'static) -> Self {
        self.permissions = Arc::new(permissions);
        self
    }

    pub fn passwords(mut self, passwords: impl PaymentPasswordVerifier + 'static) -> Self {
        self.passwords = Arc::new(passwords);
        self
    }

    pub fn build(self) -> TestEngine {
        let accounts = Arc::new(MemoryAccountStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let policies = Arc::new(MemoryLimitPolicyStore::new());
        let review_queue = Arc::new(MemoryReviewQueue::new());
        let cache = MemoryCache::new();
        let clock = Arc::new(ManualClock::new(noon()));

        let components = EngineComponents {
            accounts: accounts.clone(),
            records: records.clone(),
            policies: policies.clone(),
            cache: Arc::new(cache.clone()),
            permissions: self.permissions,
            passwords: self.passwords,
            review_queue: review_queue.clone(),
            clock: clock.clone(),
        };

        TestEngine {
            engine: Arc::new(TransactionEngine::new(components, self.config)),
            accounts,
            records,
            policies,
            review_queue,
            cache,
            clock,
        }
    }
}

/// 拒绝指定设备的权限校验
pub struct DenyDevice(pub &'static str);

#[async_trait]
impl PermissionValidator for DenyDevice {
    async fn validate(
        &self,
        _person_id: i64,
        device_id: Option<String>,
        _region_id: Option<String>,
    ) -> Result<PermissionDecision> {
        if device_id.as_deref() == Some(self.0) {
            Ok(PermissionDecision::deny(format!("设备 {} 未授权", self.0)))
        } else {
            Ok(PermissionDecision::allow())
        }
    }
}

/// 固定密码的验证器，错误时剩余次数固定
pub struct FixedPassword {
    pub password: &'static str,
    pub remaining: u32,
}

#[async_trait]
impl PaymentPasswordVerifier for FixedPassword {
    async fn verify(&self, _person_id: i64, password: String) -> Result<PasswordVerification> {
        if password == self.password {
            Ok(PasswordVerification::passed())
        } else {
            Ok(PasswordVerification::rejected(Some(self.remaining)))
        }
    }
}

pub fn fast_retry(max_retries: u32) -> consume_shared::retry::RetryPolicy {
    consume_shared::retry::RetryPolicy {
        max_retries,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        multiplier: 2.0,
    }
}
