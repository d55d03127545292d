//! 限额策略实体
//!
//! 四个作用域（人员、设备、区域、消费模式）各自配置可选上限，
//! 生效策略对所有适用作用域逐字段取最小值。

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::LimitScope;

/// 限额上限集合
///
/// 字段为 None 表示该维度不限制。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitBounds {
    pub single_limit: Option<Decimal>,
    pub daily_limit: Option<Decimal>,
    pub weekly_limit: Option<Decimal>,
    pub monthly_limit: Option<Decimal>,
    pub daily_count_limit: Option<i32>,
    pub weekly_count_limit: Option<i32>,
    pub monthly_count_limit: Option<i32>,
}

fn tighter<T: PartialOrd + Copy>(current: Option<T>, other: Option<T>) -> Option<T> {
    match (current, other) {
        (Some(a), Some(b)) => Some(if b < a { b } else { a }),
        (None, b) => b,
        (a, None) => a,
    }
}

impl LimitBounds {
    /// 逐字段收紧：两者都有值时取较小者，仅一方有值时取该值
    pub fn tighten(&mut self, other: &LimitBounds) {
        self.single_limit = tighter(self.single_limit, other.single_limit);
        self.daily_limit = tighter(self.daily_limit, other.daily_limit);
        self.weekly_limit = tighter(self.weekly_limit, other.weekly_limit);
        self.monthly_limit = tighter(self.monthly_limit, other.monthly_limit);
        self.daily_count_limit = tighter(self.daily_count_limit, other.daily_count_limit);
        self.weekly_count_limit = tighter(self.weekly_count_limit, other.weekly_count_limit);
        self.monthly_count_limit = tighter(self.monthly_count_limit, other.monthly_count_limit);
    }

    /// 校验所有已配置的上限均为正数
    pub fn validate(&self) -> Result<(), String> {
        let amounts = [
            ("singleLimit", self.single_limit),
            ("dailyLimit", self.daily_limit),
            ("weeklyLimit", self.weekly_limit),
            ("monthlyLimit", self.monthly_limit),
        ];
        for (name, value) in amounts {
            if value.is_some_and(|v| v <= Decimal::ZERO) {
                return Err(format!("{} 必须大于 0", name));
            }
        }

        let counts = [
            ("dailyCountLimit", self.daily_count_limit),
            ("weeklyCountLimit", self.weekly_count_limit),
            ("monthlyCountLimit", self.monthly_count_limit),
        ];
        for (name, value) in counts {
            if value.is_some_and(|v| v <= 0) {
                return Err(format!("{} 必须大于 0", name));
            }
        }
        Ok(())
    }

    pub fn is_unbounded(&self) -> bool {
        *self == Self::default()
    }
}

/// 允许消费的时段
///
/// `start > end` 表示跨零点，例如 22:00-02:00。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// 按小时构造，end 取该小时末尾（23 → 23:59:59）
    pub fn hours(start_hour: u32, end_hour: u32) -> Option<Self> {
        Some(Self {
            start: NaiveTime::from_hms_opt(start_hour, 0, 0)?,
            end: NaiveTime::from_hms_opt(end_hour, 59, 59)?,
        })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

/// 作用域限额策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LimitPolicy {
    pub scope: LimitScope,
    /// 作用域目标：人员 ID、设备 ID、区域 ID 或消费模式
    pub target: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub bounds: LimitBounds,
    #[sqlx(json)]
    #[serde(default)]
    pub time_slots: Vec<TimeSlot>,
    /// 优先级，越大越先参与合并
    pub priority: i32,
    pub enabled: bool,
}

impl LimitPolicy {
    pub fn new(scope: LimitScope, target: impl Into<String>, bounds: LimitBounds) -> Self {
        Self {
            scope,
            target: target.into(),
            bounds,
            time_slots: Vec::new(),
            priority: 0,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_time_slots(mut self, slots: Vec<TimeSlot>) -> Self {
        self.time_slots = slots;
        self
    }
}

/// 限额解析上下文
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitContext {
    pub person_id: i64,
    pub device_id: Option<String>,
    pub region_id: Option<String>,
    pub consumption_mode: Option<String>,
}

impl LimitContext {
    pub fn for_person(person_id: i64) -> Self {
        Self {
            person_id,
            ..Default::default()
        }
    }

    /// 适用的 (作用域, 目标) 列表，人员作用域始终在首位
    pub fn applicable_scopes(&self) -> Vec<(LimitScope, String)> {
        let mut scopes = vec![(LimitScope::User, self.person_id.to_string())];
        let optional = [
            (LimitScope::Device, &self.device_id),
            (LimitScope::Region, &self.region_id),
            (LimitScope::Mode, &self.consumption_mode),
        ];
        for (scope, target) in optional {
            if let Some(target) = target.as_deref().filter(|t| !t.is_empty()) {
                scopes.push((scope, target.to_string()));
            }
        }
        scopes
    }
}

/// 生效策略
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePolicy {
    #[serde(flatten)]
    pub bounds: LimitBounds,
    pub time_slots: Vec<TimeSlot>,
    /// 参与合并的作用域（按合并顺序）
    pub applied_scopes: Vec<LimitScope>,
    /// 是否来自临时限额（临时限额原样使用，不参与合并）
    pub temporary: bool,
}

impl EffectivePolicy {
    /// 按优先级从高到低合并
    ///
    /// 数值上限在所有策略间取最小值；时段取第一个配置了时段的策略。
    pub fn merge(mut policies: Vec<LimitPolicy>) -> Self {
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut effective = Self::default();
        for policy in policies.iter().filter(|p| p.enabled) {
            effective.bounds.tighten(&policy.bounds);
            if effective.time_slots.is_empty() && !policy.time_slots.is_empty() {
                effective.time_slots = policy.time_slots.clone();
            }
            if !effective.applied_scopes.contains(&policy.scope) {
                effective.applied_scopes.push(policy.scope);
            }
        }
        effective
    }

    /// 临时限额原样生效
    pub fn temporary(policy: LimitPolicy) -> Self {
        Self {
            bounds: policy.bounds,
            time_slots: policy.time_slots,
            applied_scopes: vec![policy.scope],
            temporary: true,
        }
    }

    /// 时段校验：未配置时段或任一时段命中即通过
    pub fn allows_time(&self, time: NaiveTime) -> bool {
        self.time_slots.is_empty() || self.time_slots.iter().any(|slot| slot.contains(time))
    }
}
