//! 限额解析与校验
//!
//! 生效策略 = 所有适用作用域（人员必选，设备/区域/模式按请求提供）的逐字段最小值；
//! 人员未配置策略时使用系统默认策略，不会出现完全不限额的情况。
//! 临时限额优先检查，存在时原样使用，不与常规策略合并。

use chrono::{DateTime, TimeDelta, Utc};
use consume_shared::{CacheExt, CacheStore};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cache_keys;
use crate::clock::{BusinessCalendar, Clock};
use crate::config::LimitSettings;
use crate::error::{ConsumeError, Result};
use crate::models::{
    money, ConsumeStatistics, EffectivePolicy, LimitBounds, LimitContext, LimitPolicy, LimitScope,
    LimitUsageReport, StatWindow, WindowUsage,
};
use crate::repository::LimitPolicyStore;

/// 限额校验通过后的信息
#[derive(Debug, Clone, PartialEq)]
pub struct LimitCheck {
    /// 本次消费后的日剩余额度，无日限额时为空
    pub remaining_daily: Option<Decimal>,
}

/// 策略配置冲突
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitConflict {
    pub scope: LimitScope,
    pub target: String,
    pub message: String,
}

pub struct LimitResolver {
    policies: Arc<dyn LimitPolicyStore>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    settings: LimitSettings,
}

impl LimitResolver {
    pub fn new(
        policies: Arc<dyn LimitPolicyStore>,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
        settings: LimitSettings,
    ) -> Self {
        Self {
            policies,
            cache,
            clock,
            calendar,
            settings,
        }
    }

    /// 解析生效策略
    #[instrument(skip(self), fields(person_id = context.person_id))]
    pub async fn effective_policy(&self, context: &LimitContext) -> Result<EffectivePolicy> {
        if let Some(temporary) = self.temporary_limit(context.person_id).await {
            debug!("使用临时限额");
            return Ok(EffectivePolicy::temporary(temporary));
        }

        let mut policies = Vec::new();
        for (scope, target) in context.applicable_scopes() {
            let mut scoped = self.load_scope(scope, &target).await?;
            if scope == LimitScope::User && scoped.is_empty() {
                scoped.push(self.default_policy(context.person_id));
            }
            policies.extend(scoped);
        }

        Ok(EffectivePolicy::merge(policies))
    }

    /// 按固定顺序校验候选金额，首个违反项直接返回
    ///
    /// 单笔 → 日累计 → 周累计 → 月累计 → 日/周/月次数 → 时段。
    pub fn check(
        &self,
        policy: &EffectivePolicy,
        stats: &ConsumeStatistics,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<LimitCheck> {
        let bounds = &policy.bounds;

        if let Some(limit) = bounds.single_limit.filter(|limit| amount > *limit) {
            return Err(ConsumeError::SingleLimitExceeded {
                limit: money(limit),
                attempted: money(amount),
            });
        }

        let amount_checks = [
            (StatWindow::Daily, bounds.daily_limit),
            (StatWindow::Weekly, bounds.weekly_limit),
            (StatWindow::Monthly, bounds.monthly_limit),
        ];
        for (window, limit) in amount_checks {
            let attempted = stats.amount(window) + amount;
            if let Some(limit) = limit.filter(|limit| attempted > *limit) {
                let (limit, attempted) = (money(limit), money(attempted));
                return Err(match window {
                    StatWindow::Daily => ConsumeError::DailyLimitExceeded { limit, attempted },
                    StatWindow::Weekly => ConsumeError::WeeklyLimitExceeded { limit, attempted },
                    StatWindow::Monthly => ConsumeError::MonthlyLimitExceeded { limit, attempted },
                });
            }
        }

        let count_checks = [
            (StatWindow::Daily, bounds.daily_count_limit),
            (StatWindow::Weekly, bounds.weekly_count_limit),
            (StatWindow::Monthly, bounds.monthly_count_limit),
        ];
        for (window, limit) in count_checks {
            let attempted = stats.count(window) + 1;
            if let Some(limit) = limit.map(i64::from).filter(|limit| attempted > *limit) {
                return Err(ConsumeError::CountLimitExceeded {
                    window,
                    limit,
                    attempted,
                });
            }
        }

        let local_time = self.calendar.local_time(at);
        if !policy.allows_time(local_time) {
            return Err(ConsumeError::TimeSlotDenied {
                current: local_time.format("%H:%M").to_string(),
            });
        }

        Ok(LimitCheck {
            remaining_daily: bounds
                .daily_limit
                .map(|limit| money(limit - (stats.daily_amount + amount))),
        })
    }

    /// 解析生效策略并按当前时间校验本次消费
    pub async fn validate(
        &self,
        context: &LimitContext,
        stats: &ConsumeStatistics,
        amount: Decimal,
    ) -> Result<LimitCheck> {
        let policy = self.effective_policy(context).await?;
        self.check(&policy, stats, amount, self.clock.now())
    }

    /// 新增或覆盖作用域策略，并使该作用域缓存失效
    #[instrument(skip(self, policy), fields(scope = %policy.scope, target = %policy.target))]
    pub async fn set_policy(&self, policy: &LimitPolicy) -> Result<()> {
        if policy.target.trim().is_empty() {
            return Err(ConsumeError::InvalidParam("策略目标不能为空".to_string()));
        }
        policy.bounds.validate().map_err(ConsumeError::InvalidParam)?;

        self.policies.upsert(policy).await?;
        self.evict(&cache_keys::limit_policy(policy.scope, &policy.target))
            .await;
        info!(priority = policy.priority, "限额策略已更新");
        Ok(())
    }

    /// 设置临时限额，默认有效期取配置（分钟）
    #[instrument(skip(self, bounds))]
    pub async fn set_temporary_limit(
        &self,
        person_id: i64,
        bounds: LimitBounds,
        duration_minutes: Option<i64>,
    ) -> Result<()> {
        bounds.validate().map_err(ConsumeError::InvalidParam)?;
        let minutes = duration_minutes.unwrap_or(self.settings.temporary_limit_minutes);
        let ttl = TimeDelta::minutes(minutes)
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
            .ok_or_else(|| ConsumeError::InvalidParam(format!("临时限额时长无效: {}", minutes)))?;

        let policy = LimitPolicy::new(LimitScope::User, person_id.to_string(), bounds);
        self.cache
            .set_json(&cache_keys::temporary_limit(person_id), &policy, ttl)
            .await?;
        info!(person_id, minutes, "临时限额已设置");
        Ok(())
    }

    pub async fn clear_temporary_limit(&self, person_id: i64) -> Result<()> {
        self.cache
            .delete(&cache_keys::temporary_limit(person_id))
            .await?;
        Ok(())
    }

    /// 各窗口的额度使用情况
    pub async fn usage_report(
        &self,
        context: &LimitContext,
        stats: &ConsumeStatistics,
    ) -> Result<LimitUsageReport> {
        let policy = self.effective_policy(context).await?;
        let bounds = &policy.bounds;

        let windows = [
            (StatWindow::Daily, bounds.daily_limit, bounds.daily_count_limit),
            (StatWindow::Weekly, bounds.weekly_limit, bounds.weekly_count_limit),
            (StatWindow::Monthly, bounds.monthly_limit, bounds.monthly_count_limit),
        ]
        .into_iter()
        .map(|(window, amount_limit, count_limit)| {
            let used_amount = stats.amount(window);
            WindowUsage {
                window,
                used_amount,
                amount_limit,
                usage_rate: amount_limit
                    .filter(|limit| !limit.is_zero())
                    .map(|limit| money(used_amount / limit * Decimal::ONE_HUNDRED)),
                used_count: stats.count(window),
                count_limit,
            }
        })
        .collect();

        Ok(LimitUsageReport {
            person_id: context.person_id,
            stat_date: stats.stat_date,
            temporary: policy.temporary,
            windows,
        })
    }

    /// 检查策略配置冲突
    ///
    /// - 低优先级作用域的上限比高优先级作用域更宽松（合并时不会生效）
    /// - 同一策略内日限额大于周限额，或周限额大于月限额
    pub async fn check_conflicts(&self, context: &LimitContext) -> Result<Vec<LimitConflict>> {
        let mut policies = Vec::new();
        for (scope, target) in context.applicable_scopes() {
            policies.extend(self.load_scope(scope, &target).await?);
        }
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut conflicts = Vec::new();
        for (index, policy) in policies.iter().enumerate() {
            let b = &policy.bounds;
            if exceeds(b.daily_limit, b.weekly_limit) {
                conflicts.push(conflict(policy, "日限额大于周限额"));
            }
            if exceeds(b.weekly_limit, b.monthly_limit) {
                conflicts.push(conflict(policy, "周限额大于月限额"));
            }

            for higher in policies[..index].iter().filter(|h| h.priority > policy.priority) {
                let looser = [
                    ("单笔", b.single_limit, higher.bounds.single_limit),
                    ("日累计", b.daily_limit, higher.bounds.daily_limit),
                    ("周累计", b.weekly_limit, higher.bounds.weekly_limit),
                    ("月累计", b.monthly_limit, higher.bounds.monthly_limit),
                ];
                for (name, lower_value, higher_value) in looser {
                    if exceeds(lower_value, higher_value) {
                        conflicts.push(conflict(
                            policy,
                            &format!(
                                "{}限额比更高优先级的 {}:{} 宽松，不会生效",
                                name, higher.scope, higher.target
                            ),
                        ));
                    }
                }
            }
        }
        Ok(conflicts)
    }

    fn default_policy(&self, person_id: i64) -> LimitPolicy {
        LimitPolicy::new(
            LimitScope::User,
            person_id.to_string(),
            self.settings.default_bounds(),
        )
    }

    async fn temporary_limit(&self, person_id: i64) -> Option<LimitPolicy> {
        match self
            .cache
            .get_json::<LimitPolicy>(&cache_keys::temporary_limit(person_id))
            .await
        {
            Ok(policy) => policy,
            Err(e) => {
                warn!(person_id, error = %e, "读取临时限额失败，使用常规策略");
                None
            }
        }
    }

    /// 读取某作用域的策略（读穿缓存）
    async fn load_scope(&self, scope: LimitScope, target: &str) -> Result<Vec<LimitPolicy>> {
        let key = cache_keys::limit_policy(scope, target);
        match self.cache.get_json::<Vec<LimitPolicy>>(&key).await {
            Ok(Some(policies)) => return Ok(policies),
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "读取限额缓存失败"),
        }

        let policies = self.policies.list_by_scope(scope, target).await?;
        if let Err(e) = self
            .cache
            .set_json(&key, &policies, self.settings.policy_cache_ttl())
            .await
        {
            warn!(key = %key, error = %e, "写入限额缓存失败");
        }
        Ok(policies)
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            warn!(key = %key, error = %e, "删除限额缓存失败");
        }
    }
}

fn exceeds(value: Option<Decimal>, bound: Option<Decimal>) -> bool {
    matches!((value, bound), (Some(v), Some(b)) if v > b)
}

fn conflict(policy: &LimitPolicy, message: &str) -> LimitConflict {
    LimitConflict {
        scope: policy.scope,
        target: policy.target.clone(),
        message: message.to_string(),
    }
}
