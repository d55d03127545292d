//! 引擎配置
//!
//! 对应配置文件中的 `[engine]` 段，缺省项全部使用默认值。

use consume_shared::config::load_section;
use consume_shared::retry::RetryPolicy;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::lock::LockConfig;
use crate::models::LimitBounds;

/// 引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub lock: LockSettings,
    pub limits: LimitSettings,
    pub risk: RiskSettings,
    /// 调用方重试（`consume --retry`）使用的退避策略
    pub retry: RetryPolicy,
    /// 统计缓存 TTL（秒）
    pub statistics_cache_ttl_secs: u64,
    /// 账户读穿缓存 TTL（秒）
    pub account_cache_ttl_secs: u64,
    /// 超过该金额需验证支付密码，为空表示仅按请求要求验证
    pub password_free_limit: Option<Decimal>,
    pub default_currency: String,
    /// 业务时区（东区小时数）
    pub timezone_offset_hours: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock: LockSettings::default(),
            limits: LimitSettings::default(),
            risk: RiskSettings::default(),
            retry: RetryPolicy::default(),
            statistics_cache_ttl_secs: 300,
            account_cache_ttl_secs: 60,
            password_free_limit: None,
            default_currency: "CNY".to_string(),
            timezone_offset_hours: 8,
        }
    }
}

impl EngineConfig {
    /// 从 `engine` 配置段加载
    pub fn load(service_name: &str) -> Result<Self, config::ConfigError> {
        load_section(service_name, "engine")
    }

    pub fn statistics_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.statistics_cache_ttl_secs)
    }

    pub fn account_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.account_cache_ttl_secs)
    }
}

/// 账户锁配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub ttl_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_ms: 10_000,
            retry_count: 50,
            retry_delay_ms: 20,
        }
    }
}

impl LockSettings {
    pub fn to_lock_config(&self) -> LockConfig {
        LockConfig {
            ttl: Duration::from_millis(self.ttl_ms),
            retry_count: self.retry_count,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// 限额配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// 系统默认策略：人员未配置策略时使用
    pub default_single_limit: Option<Decimal>,
    pub default_daily_limit: Option<Decimal>,
    pub default_weekly_limit: Option<Decimal>,
    pub default_monthly_limit: Option<Decimal>,
    pub default_daily_count_limit: Option<i32>,
    pub default_weekly_count_limit: Option<i32>,
    pub default_monthly_count_limit: Option<i32>,
    pub policy_cache_ttl_secs: u64,
    pub temporary_limit_minutes: i64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            default_single_limit: Some(Decimal::from(500)),
            default_daily_limit: Some(Decimal::from(500)),
            default_weekly_limit: Some(Decimal::from(2000)),
            default_monthly_limit: Some(Decimal::from(5000)),
            default_daily_count_limit: Some(50),
            default_weekly_count_limit: None,
            default_monthly_count_limit: None,
            policy_cache_ttl_secs: 300,
            temporary_limit_minutes: 60,
        }
    }
}

impl LimitSettings {
    pub fn default_bounds(&self) -> LimitBounds {
        LimitBounds {
            single_limit: self.default_single_limit,
            daily_limit: self.default_daily_limit,
            weekly_limit: self.default_weekly_limit,
            monthly_limit: self.default_monthly_limit,
            daily_count_limit: self.default_daily_count_limit,
            weekly_count_limit: self.default_weekly_count_limit,
            monthly_count_limit: self.default_monthly_count_limit,
        }
    }

    pub fn policy_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.policy_cache_ttl_secs)
    }
}

/// 风险评估配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub enabled: bool,
    /// 提交后异步评估；关闭时在请求内同步评估
    pub async_assessment: bool,
    pub frequency_window_minutes: i64,
    /// 无基线时的默认每小时操作次数
    pub default_hourly_rate: f64,
    /// 参与检测的最近记录条数
    pub history_limit: i64,
    pub baseline_cache_ttl_secs: u64,
    pub score_cache_ttl_secs: u64,
    pub auto_freeze_on_high: bool,
    pub auto_freeze_hours: i64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            async_assessment: true,
            frequency_window_minutes: 60,
            default_hourly_rate: 2.0,
            history_limit: 50,
            baseline_cache_ttl_secs: 3600,
            score_cache_ttl_secs: 7 * 24 * 3600,
            auto_freeze_on_high: false,
            auto_freeze_hours: 2,
        }
    }
}
