//! 交易记录实体
//!
//! 记录一经写入不再修改，唯一的例外是退款标记。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::account::Account;
use super::enums::{RecordStatus, RecordType, RiskLevel};

/// 交易记录
///
/// `order_no` 全局唯一，同时作为幂等键。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRecord {
    pub id: i64,
    pub order_no: String,
    pub person_id: i64,
    pub account_id: i64,
    pub record_type: RecordType,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub status: RecordStatus,
    #[sqlx(default)]
    pub consumption_mode: Option<String>,
    #[sqlx(default)]
    pub device_id: Option<String>,
    #[sqlx(default)]
    pub region_id: Option<String>,
    #[sqlx(default)]
    pub client_ip: Option<String>,
    pub currency: String,
    pub pay_time: DateTime<Utc>,
    #[sqlx(default)]
    pub error_code: Option<String>,
    #[sqlx(default)]
    pub error_message: Option<String>,
    pub refunded: bool,
    #[sqlx(default)]
    pub refund_time: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub refund_reason: Option<String>,
    /// 审计数据（JSON），见 [`RecordAudit`]
    #[sqlx(default)]
    pub extend_data: Option<Value>,
}

/// 记录附带的审计数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordAudit {
    /// 提交后的账户版本号
    pub account_version: i64,
    /// 提交时人员的风险等级（仅供参考）
    #[serde(default)]
    pub risk_level: RiskLevel,
    /// 本次消费后的日剩余额度，无日限额时为空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_daily: Option<Decimal>,
    /// 退款记录对应的原消费订单号
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_of: Option<String>,
}

impl ConsumeRecord {
    /// 构造一条成功的资金变动记录
    pub fn committed(
        record_type: RecordType,
        order_no: impl Into<String>,
        account: &Account,
        amount: Decimal,
        balance_after: Decimal,
        pay_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            order_no: order_no.into(),
            person_id: account.person_id,
            account_id: account.account_id,
            record_type,
            amount,
            balance_before: account.balance,
            balance_after,
            status: RecordStatus::Success,
            consumption_mode: None,
            device_id: None,
            region_id: None,
            client_ip: None,
            currency: "CNY".to_string(),
            pay_time,
            error_code: None,
            error_message: None,
            refunded: false,
            refund_time: None,
            refund_reason: None,
            extend_data: None,
        }
    }

    pub fn with_channel(
        mut self,
        device_id: Option<String>,
        region_id: Option<String>,
        consumption_mode: Option<String>,
        client_ip: Option<String>,
    ) -> Self {
        self.device_id = device_id;
        self.region_id = region_id;
        self.consumption_mode = consumption_mode;
        self.client_ip = client_ip;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_audit(mut self, audit: &RecordAudit) -> Self {
        self.extend_data = serde_json::to_value(audit).ok();
        self
    }

    /// 解析审计数据，缺失或格式不符时返回 None
    pub fn audit(&self) -> Option<RecordAudit> {
        self.extend_data
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// 是否计入消费统计
    pub fn counts_toward_spending(&self) -> bool {
        self.record_type == RecordType::Consume
            && self.status == RecordStatus::Success
            && !self.refunded
    }

    /// 对余额的有符号影响
    pub fn balance_delta(&self) -> Decimal {
        self.balance_after - self.balance_before
    }
}

/// 交易记录查询条件
///
/// 结果按 pay_time、id 倒序返回。
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub person_id: i64,
    pub record_type: Option<RecordType>,
    pub status: Option<RecordStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub include_refunded: bool,
    pub limit: Option<i64>,
}

impl RecordQuery {
    pub fn for_person(person_id: i64) -> Self {
        Self {
            person_id,
            record_type: None,
            status: None,
            from: None,
            to: None,
            include_refunded: true,
            limit: None,
        }
    }

    /// 成功的消费记录
    pub fn successful_consumes(person_id: i64) -> Self {
        Self::for_person(person_id)
            .of_type(RecordType::Consume)
            .with_status(RecordStatus::Success)
    }

    pub fn of_type(mut self, record_type: RecordType) -> Self {
        self.record_type = Some(record_type);
        self
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// 时间范围，左闭右开
    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn excluding_refunded(mut self) -> Self {
        self.include_refunded = false;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 内存过滤（不含 limit）
    pub fn matches(&self, record: &ConsumeRecord) -> bool {
        record.person_id == self.person_id
            && self.record_type.is_none_or(|t| record.record_type == t)
            && self.status.is_none_or(|s| record.status == s)
            && self.from.is_none_or(|from| record.pay_time >= from)
            && self.to.is_none_or(|to| record.pay_time < to)
            && (self.include_refunded || !record.refunded)
    }
}
