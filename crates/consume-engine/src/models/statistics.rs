//! 消费统计实体

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::StatWindow;

/// 滚动消费统计（日/周/月）
///
/// 由交易记录重新计算，仅作为短期缓存，不是权威数据。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeStatistics {
    pub person_id: i64,
    pub stat_date: NaiveDate,
    pub daily_amount: Decimal,
    pub daily_count: i64,
    pub weekly_amount: Decimal,
    pub weekly_count: i64,
    pub monthly_amount: Decimal,
    pub monthly_count: i64,
}

impl ConsumeStatistics {
    pub fn empty(person_id: i64, stat_date: NaiveDate) -> Self {
        Self {
            person_id,
            stat_date,
            daily_amount: super::money(Decimal::ZERO),
            daily_count: 0,
            weekly_amount: super::money(Decimal::ZERO),
            weekly_count: 0,
            monthly_amount: super::money(Decimal::ZERO),
            monthly_count: 0,
        }
    }

    pub fn amount(&self, window: StatWindow) -> Decimal {
        match window {
            StatWindow::Daily => self.daily_amount,
            StatWindow::Weekly => self.weekly_amount,
            StatWindow::Monthly => self.monthly_amount,
        }
    }

    pub fn count(&self, window: StatWindow) -> i64 {
        match window {
            StatWindow::Daily => self.daily_count,
            StatWindow::Weekly => self.weekly_count,
            StatWindow::Monthly => self.monthly_count,
        }
    }
}

/// 单个窗口的额度使用情况
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowUsage {
    pub window: StatWindow,
    pub used_amount: Decimal,
    pub amount_limit: Option<Decimal>,
    /// 使用率百分比（used / limit × 100），无限额时为空
    pub usage_rate: Option<Decimal>,
    pub used_count: i64,
    pub count_limit: Option<i32>,
}

/// 限额使用报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitUsageReport {
    pub person_id: i64,
    pub stat_date: NaiveDate,
    pub temporary: bool,
    pub windows: Vec<WindowUsage>,
}
