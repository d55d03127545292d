//! 消费交易引擎
//!
//! 对外入口 [`TransactionEngine::process_consume`]，按固定状态机组合各协作方：
//! 参数校验 → 幂等 → 权限 → 账户 → 冻结 → 限额 → 支付密码（条件）→ 余额 → 提交。
//! 任一检查失败直接以对应错误码结束，引擎自身不做自动重试。

use chrono::{SubsecRound, TimeDelta};
use consume_shared::observability::metrics;
use consume_shared::retry::{RetryPolicy, retry};
use consume_shared::{CacheExt, CacheStore};
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::consistency::{ConsistencyCoordinator, ConsistencyReport, Mutation, RecordWrite};
use super::dto::{
    ConsumeRequest, ConsumeResult, RechargeRequest, validate_order_no,
};
use super::idempotency::IdempotencyGuard;
use super::limit_resolver::LimitResolver;
use super::security::{FreezeRegistry, PaymentPasswordVerifier, PermissionValidator};
use super::statistics::ConsumeStatisticsAggregator;
use crate::cache_keys;
use crate::clock::{BusinessCalendar, Clock};
use crate::config::{EngineConfig, RiskSettings};
use crate::error::{ConsumeError, Result};
use crate::lock::LockManager;
use crate::models::{
    money, Account, AccountStatus, ConsumeRecord, ConsumeStage, ConsumeStatistics, FreezeInfo,
    RecordAudit, RecordStatus, RecordType, RiskLevel, RiskScore,
};
use crate::repository::{AccountStore, LimitPolicyStore, RecordStore};
use crate::risk::{ReviewQueue, RiskScorer};

/// 引擎依赖的外部协作方
#[derive(Clone)]
pub struct EngineComponents {
    pub accounts: Arc<dyn AccountStore>,
    pub records: Arc<dyn RecordStore>,
    pub policies: Arc<dyn LimitPolicyStore>,
    pub cache: Arc<dyn CacheStore>,
    pub permissions: Arc<dyn PermissionValidator>,
    pub passwords: Arc<dyn PaymentPasswordVerifier>,
    pub review_queue: Arc<dyn ReviewQueue>,
    pub clock: Arc<dyn Clock>,
}

pub struct TransactionEngine {
    accounts: Arc<dyn AccountStore>,
    records: Arc<dyn RecordStore>,
    cache: Arc<dyn CacheStore>,
    permissions: Arc<dyn PermissionValidator>,
    passwords: Arc<dyn PaymentPasswordVerifier>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    idempotency: IdempotencyGuard,
    limits: LimitResolver,
    statistics: Arc<ConsumeStatisticsAggregator>,
    risk: Arc<RiskScorer>,
    freezes: Arc<FreezeRegistry>,
    coordinator: ConsistencyCoordinator,
    config: EngineConfig,
}

impl TransactionEngine {
    pub fn new(components: EngineComponents, config: EngineConfig) -> Self {
        let EngineComponents {
            accounts,
            records,
            policies,
            cache,
            permissions,
            passwords,
            review_queue,
            clock,
        } = components;
        let calendar = BusinessCalendar::with_offset_hours(config.timezone_offset_hours);

        let limits = LimitResolver::new(
            policies,
            cache.clone(),
            clock.clone(),
            calendar,
            config.limits.clone(),
        );
        let statistics = Arc::new(ConsumeStatisticsAggregator::new(
            records.clone(),
            cache.clone(),
            clock.clone(),
            calendar,
            config.statistics_cache_ttl(),
        ));
        let risk = Arc::new(RiskScorer::new(
            records.clone(),
            cache.clone(),
            review_queue,
            clock.clone(),
            calendar,
            config.risk.clone(),
        ));
        let freezes = Arc::new(FreezeRegistry::new(cache.clone(), clock.clone()));
        let coordinator = ConsistencyCoordinator::new(
            accounts.clone(),
            records.clone(),
            cache.clone(),
            LockManager::new(cache.clone(), config.lock.to_lock_config()),
        );

        Self {
            idempotency: IdempotencyGuard::new(records.clone()),
            accounts,
            records,
            cache,
            permissions,
            passwords,
            clock,
            calendar,
            limits,
            statistics,
            risk,
            freezes,
            coordinator,
            config,
        }
    }

    pub fn limits(&self) -> &LimitResolver {
        &self.limits
    }

    pub fn risk(&self) -> &RiskScorer {
        &self.risk
    }

    /// 处理一笔消费
    ///
    /// 不返回 `Err`：所有失败都转换为带错误码的结果。
    #[instrument(skip(self, request), fields(person_id = request.person_id, amount = %request.amount))]
    pub async fn process_consume(&self, request: ConsumeRequest) -> ConsumeResult {
        let started = Instant::now();
        let order_no = match request.given_order_no() {
            Some(order_no) => order_no.to_string(),
            None => self.generate_order_no(RecordType::Consume),
        };

        let mut stage = ConsumeStage::Received;
        let result = match self.run_consume(&request, &order_no, &mut stage).await {
            Ok(result) => result,
            Err(e) => {
                if e.is_business_error() {
                    info!(order_no = %order_no, stage = ?stage, code = e.error_code(), error = %e, "消费被拒绝");
                } else {
                    error!(order_no = %order_no, stage = ?stage, error = %e, "消费处理失败");
                }
                ConsumeResult::failure(&order_no, request.person_id, &e)
            }
        };

        metrics::record_consume(result.outcome(), started.elapsed().as_secs_f64());
        result
    }

    async fn run_consume(
        &self,
        request: &ConsumeRequest,
        order_no: &str,
        stage: &mut ConsumeStage,
    ) -> Result<ConsumeResult> {
        request.validate()?;
        let person_id = request.person_id;

        if let Some(prior) = self.idempotency.resolve(order_no, RecordType::Consume).await {
            return Ok(prior);
        }
        *stage = ConsumeStage::IdempotencyChecked;

        let decision = self
            .permissions
            .validate(person_id, request.device_id.clone(), request.region_id.clone())
            .await?;
        if !decision.allowed {
            return Err(ConsumeError::PermissionDenied {
                reason: decision.reason.unwrap_or_else(|| "无消费权限".to_string()),
            });
        }
        *stage = ConsumeStage::PermissionChecked;

        let account = self.load_account(person_id).await?;
        ensure_active(&account)?;
        *stage = ConsumeStage::AccountValidated;

        if let Some(info) = self.freezes.freeze_info(person_id).await? {
            return Err(ConsumeError::AccountFrozen { reason: info.reason });
        }
        *stage = ConsumeStage::FrozenCheck;

        let amount = money(request.amount);
        let stats = self.statistics.statistics(person_id).await;
        let check = self
            .limits
            .validate(&request.limit_context(), &stats, amount)
            .await?;
        *stage = ConsumeStage::LimitChecked;

        if self.password_required(request) {
            self.verify_password(request).await?;
            *stage = ConsumeStage::PasswordChecked;
        }

        ensure_affordable(&account, amount)?;
        *stage = ConsumeStage::BalanceValidated;

        let risk_level = self.standing_risk_level(person_id).await;
        let pay_time = self.clock.now().trunc_subsecs(6);
        let currency = request
            .currency
            .clone()
            .unwrap_or_else(|| self.config.default_currency.clone());

        let committed = self
            .coordinator
            .execute(&account, "consume", |current| {
                ensure_active(current)?;
                ensure_affordable(current, amount)?;
                let audit = RecordAudit {
                    account_version: current.version + 1,
                    risk_level,
                    remaining_daily: check.remaining_daily,
                    refund_of: None,
                };
                let record = ConsumeRecord::committed(
                    RecordType::Consume,
                    order_no,
                    current,
                    amount,
                    money(current.balance - amount),
                    pay_time,
                )
                .with_channel(
                    request.device_id.clone(),
                    request.region_id.clone(),
                    request.consumption_mode.clone(),
                    request.client_ip.clone(),
                )
                .with_currency(currency)
                .with_audit(&audit);
                Ok(Mutation {
                    balance_delta: -amount,
                    record: RecordWrite::Insert(record),
                    output: (),
                })
            })
            .await;

        let record = match committed {
            Ok(committed) => committed.record,
            Err(ConsumeError::DuplicateOrder(_)) => {
                // 同一订单号的并发请求先一步提交
                return self
                    .idempotency
                    .resolve(order_no, RecordType::Consume)
                    .await
                    .ok_or_else(|| ConsumeError::DuplicateOrder(order_no.to_string()));
            }
            Err(e) => return Err(e),
        };
        *stage = ConsumeStage::Committed;
        let record = record.ok_or_else(|| ConsumeError::Internal("提交后缺少消费记录".to_string()))?;

        self.statistics.invalidate(person_id).await;
        self.after_commit(record.clone()).await;

        *stage = ConsumeStage::Success;
        info!(
            order_no = %record.order_no,
            balance_after = %record.balance_after,
            "消费成功"
        );
        Ok(ConsumeResult::from_record(&record))
    }

    /// 调用方重试：仅对可重试错误码以同一订单号重新提交
    pub async fn process_consume_with_retry(
        &self,
        mut request: ConsumeRequest,
        policy: &RetryPolicy,
    ) -> ConsumeResult {
        if request.given_order_no().is_none() {
            request.order_no = Some(self.generate_order_no(RecordType::Consume));
        }

        let request = &request;
        retry(policy, "process_consume", move || async move {
            let result = self.process_consume(request.clone()).await;
            if result.success {
                Ok(result)
            } else {
                Err(result)
            }
        })
        .await
        .unwrap_or_else(|failed| failed)
    }

    /// 按订单号查询处理结果
    pub async fn query_consume_result(&self, order_no: &str) -> Result<ConsumeResult> {
        self.records
            .find_by_order_no(order_no)
            .await?
            .map(|record| ConsumeResult::from_record(&record))
            .ok_or_else(|| ConsumeError::OrderNotFound(order_no.to_string()))
    }

    /// 充值（按订单号幂等）
    #[instrument(skip(self, request), fields(person_id = request.person_id, amount = %request.amount))]
    pub async fn recharge(&self, request: RechargeRequest) -> ConsumeResult {
        let order_no = match request.order_no.as_deref().filter(|o| !o.trim().is_empty()) {
            Some(order_no) => order_no.to_string(),
            None => self.generate_order_no(RecordType::Recharge),
        };

        match self.run_recharge(&request, &order_no).await {
            Ok(result) => result,
            Err(e) => {
                warn!(order_no = %order_no, code = e.error_code(), error = %e, "充值失败");
                ConsumeResult::failure(&order_no, request.person_id, &e)
            }
        }
    }

    async fn run_recharge(&self, request: &RechargeRequest, order_no: &str) -> Result<ConsumeResult> {
        request.validate()?;
        if let Some(prior) = self.idempotency.resolve(order_no, RecordType::Recharge).await {
            return Ok(prior);
        }

        let account = self.load_account(request.person_id).await?;
        ensure_open(&account)?;
        let amount = money(request.amount);
        let pay_time = self.clock.now().trunc_subsecs(6);
        let currency = self.config.default_currency.clone();

        let committed = self
            .coordinator
            .execute(&account, "recharge", |current| {
                ensure_open(current)?;
                let audit = RecordAudit {
                    account_version: current.version + 1,
                    ..Default::default()
                };
                let record = ConsumeRecord::committed(
                    RecordType::Recharge,
                    order_no,
                    current,
                    amount,
                    money(current.balance + amount),
                    pay_time,
                )
                .with_channel(request.device_id.clone(), None, None, None)
                .with_currency(currency)
                .with_audit(&audit);
                Ok(Mutation {
                    balance_delta: amount,
                    record: RecordWrite::Insert(record),
                    output: (),
                })
            })
            .await;

        let record = match committed {
            Ok(committed) => committed.record,
            Err(ConsumeError::DuplicateOrder(_)) => {
                return self
                    .idempotency
                    .resolve(order_no, RecordType::Recharge)
                    .await
                    .ok_or_else(|| ConsumeError::DuplicateOrder(order_no.to_string()));
            }
            Err(e) => return Err(e),
        }
        .ok_or_else(|| ConsumeError::Internal("提交后缺少充值记录".to_string()))?;

        info!(order_no = %order_no, balance_after = %record.balance_after, "充值成功");
        Ok(ConsumeResult::from_record(&record))
    }

    /// 退款：原路退回一笔成功的消费，每笔消费只能退一次
    ///
    /// 原订单不存在时失败结果的 `person_id` 为 0，其余失败带原消费的人员。
    #[instrument(skip(self))]
    pub async fn refund(&self, order_no: &str, reason: &str) -> ConsumeResult {
        let original = match self.find_original(order_no).await {
            Ok(original) => original,
            Err(e) => {
                warn!(code = e.error_code(), error = %e, "退款被拒绝");
                return ConsumeResult::failure(order_no, 0, &e);
            }
        };
        if let Err(e) = ensure_refundable(&original) {
            warn!(code = e.error_code(), error = %e, "退款被拒绝");
            return ConsumeResult::failure(order_no, original.person_id, &e);
        }

        let refund_no = self.generate_order_no(RecordType::Refund);
        match self.run_refund(&original, &refund_no, reason).await {
            Ok(result) => result,
            Err(e) => {
                warn!(code = e.error_code(), error = %e, "退款失败");
                ConsumeResult::failure(order_no, original.person_id, &e)
            }
        }
    }

    async fn find_original(&self, order_no: &str) -> Result<ConsumeRecord> {
        validate_order_no(order_no)?;
        self.records
            .find_by_order_no(order_no)
            .await?
            .ok_or_else(|| ConsumeError::OrderNotFound(order_no.to_string()))
    }

    async fn run_refund(
        &self,
        original: &ConsumeRecord,
        refund_no: &str,
        reason: &str,
    ) -> Result<ConsumeResult> {
        let account = self
            .accounts
            .get(original.account_id)
            .await?
            .ok_or(ConsumeError::AccountNotFound(original.person_id))?;
        ensure_open(&account)?;
        let pay_time = self.clock.now().trunc_subsecs(6);

        let committed = self
            .coordinator
            .execute(&account, "refund", |current| {
                let audit = RecordAudit {
                    account_version: current.version + 1,
                    refund_of: Some(original.order_no.clone()),
                    ..Default::default()
                };
                let refund = ConsumeRecord::committed(
                    RecordType::Refund,
                    refund_no,
                    current,
                    original.amount,
                    money(current.balance + original.amount),
                    pay_time,
                )
                .with_channel(
                    original.device_id.clone(),
                    original.region_id.clone(),
                    original.consumption_mode.clone(),
                    None,
                )
                .with_currency(original.currency.clone())
                .with_audit(&audit);
                Ok(Mutation {
                    balance_delta: original.amount,
                    record: RecordWrite::Refund {
                        refund,
                        original_order_no: original.order_no.clone(),
                        reason: reason.to_string(),
                    },
                    output: (),
                })
            })
            .await
            .map_err(|e| match e {
                ConsumeError::RecordPersistenceFailed { .. } => {
                    ConsumeError::RecordPersistenceFailed {
                        order_no: original.order_no.clone(),
                    }
                }
                other => other,
            })?;

        let record = committed
            .record
            .ok_or_else(|| ConsumeError::Internal("提交后缺少退款记录".to_string()))?;
        self.statistics.invalidate(original.person_id).await;

        info!(
            refund_order_no = %record.order_no,
            amount = %record.amount,
            balance_after = %record.balance_after,
            "退款成功"
        );
        Ok(ConsumeResult::from_record(&record))
    }

    pub async fn freeze(&self, person_id: i64, reason: &str, duration: TimeDelta) -> Result<FreezeInfo> {
        self.freezes.freeze(person_id, reason, duration).await
    }

    pub async fn unfreeze(&self, person_id: i64) -> Result<()> {
        self.freezes.unfreeze(person_id).await
    }

    pub async fn freeze_info(&self, person_id: i64) -> Result<Option<FreezeInfo>> {
        self.freezes.freeze_info(person_id).await
    }

    pub async fn statistics(&self, person_id: i64) -> ConsumeStatistics {
        self.statistics.statistics(person_id).await
    }

    pub async fn risk_score(&self, person_id: i64) -> Result<RiskScore> {
        self.risk.risk_score(person_id).await
    }

    /// 核对账户余额与流水（读权威存储，不经过缓存）
    pub async fn verify_consistency(&self, person_id: i64) -> Result<ConsistencyReport> {
        let account = self
            .accounts
            .get_by_person(person_id)
            .await?
            .ok_or(ConsumeError::AccountNotFound(person_id))?;
        self.coordinator.verify(&account).await
    }

    /// 开户
    #[instrument(skip(self))]
    pub async fn open_account(&self, person_id: i64, credit_limit: Decimal) -> Result<Account> {
        if person_id <= 0 {
            return Err(ConsumeError::InvalidParam("personId 必须为正数".to_string()));
        }
        if credit_limit.is_sign_negative() {
            return Err(ConsumeError::InvalidParam("信用额度不能为负".to_string()));
        }
        if self.accounts.get_by_person(person_id).await?.is_some() {
            return Err(ConsumeError::InvalidParam(format!(
                "账户已存在: person_id={}",
                person_id
            )));
        }
        let account = self
            .accounts
            .create(&Account::open(person_id, credit_limit))
            .await?;
        info!(account_id = account.account_id, "账户已开立");
        Ok(account)
    }

    /// 修改账户状态并使账户缓存失效
    #[instrument(skip(self))]
    pub async fn set_account_status(&self, person_id: i64, status: AccountStatus) -> Result<()> {
        let account = self
            .accounts
            .get_by_person(person_id)
            .await?
            .ok_or(ConsumeError::AccountNotFound(person_id))?;
        self.accounts.update_status(account.account_id, status).await?;
        self.evict_account(person_id).await;
        info!(%status, "账户状态已更新");
        Ok(())
    }

    /// 生成订单号：类型前缀 + 业务时区 yyyyMMddHHmmss + 8 位随机数
    pub fn generate_order_no(&self, record_type: RecordType) -> String {
        let local = self.calendar.local(self.clock.now());
        let suffix: u32 = rand::rng().random_range(0..100_000_000);
        format!(
            "{}{}{:08}",
            record_type.order_prefix(),
            local.format("%Y%m%d%H%M%S"),
            suffix
        )
    }

    /// 读穿账户缓存
    async fn load_account(&self, person_id: i64) -> Result<Account> {
        let key = cache_keys::account(person_id);
        match self.cache.get_json::<Account>(&key).await {
            Ok(Some(account)) => return Ok(account),
            Ok(None) => {}
            Err(e) => warn!(person_id, error = %e, "读取账户缓存失败"),
        }

        let account = self
            .accounts
            .get_by_person(person_id)
            .await?
            .ok_or(ConsumeError::AccountNotFound(person_id))?;
        if let Err(e) = self
            .cache
            .set_json(&key, &account, self.config.account_cache_ttl())
            .await
        {
            warn!(person_id, error = %e, "写入账户缓存失败");
        }
        Ok(account)
    }

    async fn evict_account(&self, person_id: i64) {
        let key = cache_keys::account(person_id);
        if let Err(e) = self.cache.delete(&key).await {
            warn!(key = %key, error = %e, "账户缓存失效失败");
        }
    }

    fn password_required(&self, request: &ConsumeRequest) -> bool {
        request.require_password
            || self
                .config
                .password_free_limit
                .is_some_and(|limit| request.amount > limit)
    }

    async fn verify_password(&self, request: &ConsumeRequest) -> Result<()> {
        let password = request
            .payment_password
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or(ConsumeError::PaymentPasswordRequired)?;

        let verification = self.passwords.verify(request.person_id, password).await?;
        if verification.success {
            return Ok(());
        }
        let message = if verification.locked {
            "错误次数过多，支付密码已锁定".to_string()
        } else {
            match verification.remaining_attempts {
                Some(remaining) => format!("还可尝试 {} 次", remaining),
                None => "密码不正确".to_string(),
            }
        };
        Err(ConsumeError::PasswordIncorrect {
            message,
            remaining_attempts: verification.remaining_attempts,
        })
    }

    /// 提交时人员的累计风险等级，读取失败按 SAFE 处理
    async fn standing_risk_level(&self, person_id: i64) -> RiskLevel {
        if !self.config.risk.enabled {
            return RiskLevel::Safe;
        }
        match self.risk.risk_score(person_id).await {
            Ok(score) => score.level,
            Err(e) => {
                warn!(person_id, error = %e, "读取风险分失败");
                RiskLevel::Safe
            }
        }
    }

    /// 提交后的风险评估，结果不影响已提交的交易
    async fn after_commit(&self, record: ConsumeRecord) {
        let settings = &self.config.risk;
        if !settings.enabled {
            return;
        }
        if settings.async_assessment {
            let risk = self.risk.clone();
            let freezes = self.freezes.clone();
            let settings = settings.clone();
            tokio::spawn(async move {
                assess_committed(&risk, &freezes, &settings, &record).await;
            });
        } else {
            assess_committed(&self.risk, &self.freezes, settings, &record).await;
        }
    }
}

async fn assess_committed(
    risk: &RiskScorer,
    freezes: &FreezeRegistry,
    settings: &RiskSettings,
    record: &ConsumeRecord,
) {
    let assessment = match risk.assess(record).await {
        Ok(assessment) => assessment,
        Err(e) => {
            warn!(order_no = %record.order_no, error = %e, "风险评估失败");
            return;
        }
    };
    debug!(
        order_no = %record.order_no,
        level = assessment.result.level.as_str(),
        standing = assessment.score.score,
        "风险评估完成"
    );

    if settings.auto_freeze_on_high && assessment.score.level == RiskLevel::High {
        let reason = format!("风险评分过高: {}", assessment.score.score);
        match freezes
            .freeze(record.person_id, &reason, TimeDelta::hours(settings.auto_freeze_hours))
            .await
        {
            Ok(info) => warn!(person_id = record.person_id, expires_at = %info.expires_at, "已自动临时冻结"),
            Err(e) => warn!(person_id = record.person_id, error = %e, "自动冻结失败"),
        }
    }
}

fn ensure_active(account: &Account) -> Result<()> {
    if account.is_active() {
        Ok(())
    } else {
        Err(ConsumeError::AccountInactive {
            person_id: account.person_id,
            status: account.status,
        })
    }
}

/// 注销账户不可再发生任何资金变动
fn ensure_open(account: &Account) -> Result<()> {
    if account.status == AccountStatus::Closed {
        Err(ConsumeError::AccountInactive {
            person_id: account.person_id,
            status: account.status,
        })
    } else {
        Ok(())
    }
}

/// 仅未退款的成功消费可退款
fn ensure_refundable(original: &ConsumeRecord) -> Result<()> {
    if original.record_type != RecordType::Consume || original.status != RecordStatus::Success {
        return Err(ConsumeError::InvalidParam(format!(
            "仅成功的消费可退款: {}",
            original.order_no
        )));
    }
    if original.refunded {
        return Err(ConsumeError::AlreadyRefunded(original.order_no.clone()));
    }
    Ok(())
}

fn ensure_affordable(account: &Account, amount: Decimal) -> Result<()> {
    if account.can_afford(amount) {
        Ok(())
    } else {
        Err(ConsumeError::InsufficientBalance {
            available: money(account.available()),
            required: amount,
        })
    }
}
