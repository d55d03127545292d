//! 服务层数据传输对象
//!
//! 请求与结果的对外形状，与内部领域模型解耦

use chrono::{DateTime, Utc};
use consume_shared::retry::Retryable;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConsumeError, Result};
use crate::models::{ConsumeRecord, LimitContext, RecordStatus, RiskLevel};

/// 订单号最大长度
const MAX_ORDER_NO_LEN: usize = 64;

/// 消费请求
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub person_id: i64,
    pub amount: Decimal,
    /// 为空时由引擎生成
    #[serde(default)]
    pub order_no: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub consumption_mode: Option<String>,
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub payment_password: Option<String>,
    /// 调用方显式要求验证支付密码
    #[serde(default)]
    pub require_password: bool,
    /// 为空时使用配置的默认币种
    #[serde(default)]
    pub currency: Option<String>,
}

impl ConsumeRequest {
    pub fn new(person_id: i64, amount: Decimal) -> Self {
        Self {
            person_id,
            amount,
            order_no: None,
            device_id: None,
            region_id: None,
            consumption_mode: None,
            client_ip: None,
            payment_password: None,
            require_password: false,
            currency: None,
        }
    }

    pub fn with_order_no(mut self, order_no: impl Into<String>) -> Self {
        self.order_no = Some(order_no.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_region(mut self, region_id: impl Into<String>) -> Self {
        self.region_id = Some(region_id.into());
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.consumption_mode = Some(mode.into());
        self
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.payment_password = Some(password.into());
        self
    }

    pub fn requiring_password(mut self) -> Self {
        self.require_password = true;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// 请求自带的订单号（空串视为未提供）
    pub fn given_order_no(&self) -> Option<&str> {
        self.order_no.as_deref().filter(|o| !o.trim().is_empty())
    }

    /// 参数校验，失败时不触碰任何存储
    pub fn validate(&self) -> Result<()> {
        if self.person_id <= 0 {
            return Err(ConsumeError::InvalidParam("personId 必须为正数".to_string()));
        }
        validate_amount(self.amount)?;
        if let Some(order_no) = self.given_order_no() {
            validate_order_no(order_no)?;
        }
        if let Some(currency) = &self.currency {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(ConsumeError::InvalidParam(format!(
                    "币种格式不正确: {}",
                    currency
                )));
            }
        }
        Ok(())
    }

    pub fn limit_context(&self) -> LimitContext {
        LimitContext {
            person_id: self.person_id,
            device_id: self.device_id.clone(),
            region_id: self.region_id.clone(),
            consumption_mode: self.consumption_mode.clone(),
        }
    }
}

// 支付密码不进入日志
impl fmt::Debug for ConsumeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumeRequest")
            .field("person_id", &self.person_id)
            .field("amount", &self.amount)
            .field("order_no", &self.order_no)
            .field("device_id", &self.device_id)
            .field("region_id", &self.region_id)
            .field("consumption_mode", &self.consumption_mode)
            .field("client_ip", &self.client_ip)
            .field(
                "payment_password",
                &self.payment_password.as_ref().map(|_| "******"),
            )
            .field("require_password", &self.require_password)
            .field("currency", &self.currency)
            .finish()
    }
}

/// 金额必须为正且最多两位小数
pub fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(ConsumeError::InvalidParam(format!(
            "金额必须大于 0: {}",
            amount
        )));
    }
    if amount.normalize().scale() > crate::models::MONEY_SCALE {
        return Err(ConsumeError::InvalidParam(format!(
            "金额最多两位小数: {}",
            amount
        )));
    }
    Ok(())
}

pub fn validate_order_no(order_no: &str) -> Result<()> {
    if order_no.len() > MAX_ORDER_NO_LEN {
        return Err(ConsumeError::InvalidParam(format!(
            "订单号长度不能超过 {}",
            MAX_ORDER_NO_LEN
        )));
    }
    if !order_no.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ConsumeError::InvalidParam(format!(
            "订单号包含非法字符: {}",
            order_no
        )));
    }
    Ok(())
}

/// 充值请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeRequest {
    pub person_id: i64,
    pub amount: Decimal,
    #[serde(default)]
    pub order_no: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl RechargeRequest {
    pub fn new(person_id: i64, amount: Decimal) -> Self {
        Self {
            person_id,
            amount,
            order_no: None,
            device_id: None,
        }
    }

    pub fn with_order_no(mut self, order_no: impl Into<String>) -> Self {
        self.order_no = Some(order_no.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.person_id <= 0 {
            return Err(ConsumeError::InvalidParam("personId 必须为正数".to_string()));
        }
        validate_amount(self.amount)?;
        if let Some(order_no) = self.order_no.as_deref().filter(|o| !o.is_empty()) {
            validate_order_no(order_no)?;
        }
        Ok(())
    }
}

/// 处理结果
///
/// 成功结果与重放结果都由记录构造，同一订单号的多次调用得到完全相同的结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResult {
    pub success: bool,
    pub status: RecordStatus,
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub order_no: String,
    /// 请求或原记录中的人员；退款找不到原订单时为 0
    pub person_id: i64,
    pub amount: Option<Decimal>,
    pub balance_before: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    pub consume_time: Option<DateTime<Utc>>,
    /// 提交时人员的风险等级（仅供参考）
    pub risk_level: RiskLevel,
    /// 日剩余额度
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_daily: Option<Decimal>,
}

/// 可由调用方用同一订单号重试的错误码
const RETRYABLE_CODES: [&str; 3] = [
    "CONCURRENT_MODIFICATION",
    "RECORD_PERSISTENCE_FAILED",
    "ACCOUNT_BUSY",
];

impl ConsumeResult {
    pub fn from_record(record: &ConsumeRecord) -> Self {
        let audit = record.audit().unwrap_or_default();
        let success = record.status == RecordStatus::Success;
        Self {
            success,
            status: record.status,
            error_code: record.error_code.clone(),
            message: record.error_message.clone(),
            order_no: record.order_no.clone(),
            person_id: record.person_id,
            amount: Some(record.amount),
            balance_before: Some(record.balance_before),
            balance_after: Some(record.balance_after),
            consume_time: Some(record.pay_time),
            risk_level: audit.risk_level,
            remaining_daily: audit.remaining_daily,
        }
    }

    pub fn failure(order_no: impl Into<String>, person_id: i64, error: &ConsumeError) -> Self {
        Self {
            success: false,
            status: RecordStatus::Failed,
            error_code: Some(error.error_code().to_string()),
            message: Some(error.to_string()),
            order_no: order_no.into(),
            person_id,
            amount: None,
            balance_before: None,
            balance_after: None,
            consume_time: None,
            risk_level: RiskLevel::Safe,
            remaining_daily: None,
        }
    }

    /// 指标与日志使用的结果标签
    pub fn outcome(&self) -> &str {
        if self.success {
            "SUCCESS"
        } else {
            self.error_code.as_deref().unwrap_or("SYSTEM_ERROR")
        }
    }
}

impl Retryable for ConsumeResult {
    fn is_retryable(&self) -> bool {
        !self.success
            && self
                .error_code
                .as_deref()
                .is_some_and(|code| RETRYABLE_CODES.contains(&code))
    }
}

impl fmt::Display for ConsumeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} {}: {}", self.order_no, self.outcome(), message),
            None => write!(f, "{} {}", self.order_no, self.outcome()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, RecordAudit, RecordType};
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_rejects_bad_amounts() {
        assert!(ConsumeRequest::new(1, dec!(10.50)).validate().is_ok());

        let zero = ConsumeRequest::new(1, dec!(0)).validate().unwrap_err();
        assert_eq!(zero.error_code(), "INVALID_PARAM");
        assert!(ConsumeRequest::new(1, dec!(-1)).validate().is_err());
        assert!(ConsumeRequest::new(1, dec!(1.005)).validate().is_err());
        assert!(ConsumeRequest::new(0, dec!(1)).validate().is_err());
    }

    #[test]
    fn test_validate_order_no_and_currency() {
        assert!(
            ConsumeRequest::new(1, dec!(1))
                .with_order_no("CONSUME-1_a")
                .validate()
                .is_ok()
        );
        assert!(
            ConsumeRequest::new(1, dec!(1))
                .with_order_no("bad order")
                .validate()
                .is_err()
        );
        assert!(
            ConsumeRequest::new(1, dec!(1))
                .with_currency("cny")
                .validate()
                .is_err()
        );
        assert_eq!(ConsumeRequest::new(1, dec!(1)).with_order_no("  ").given_order_no(), None);
    }

    #[test]
    fn test_debug_redacts_password() {
        let request = ConsumeRequest::new(1, dec!(1)).with_password("123456");
        let debug = format!("{:?}", request);
        assert!(!debug.contains("123456"));
        assert!(debug.contains("******"));
    }

    #[test]
    fn test_result_from_record() {
        let mut account = Account::open(9, Decimal::ZERO);
        account.balance = dec!(200.00);
        let record = ConsumeRecord::committed(
            RecordType::Consume,
            "CONSUME1",
            &account,
            dec!(150.00),
            dec!(50.00),
            Utc::now(),
        )
        .with_audit(&RecordAudit {
            account_version: 1,
            risk_level: RiskLevel::Medium,
            remaining_daily: Some(dec!(350.00)),
            refund_of: None,
        });

        let result = ConsumeResult::from_record(&record);
        assert!(result.success);
        assert_eq!(result.balance_after, Some(dec!(50.00)));
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert_eq!(result.remaining_daily, Some(dec!(350.00)));
        assert_eq!(result.outcome(), "SUCCESS");
    }

    #[test]
    fn test_failure_result_retryable() {
        let busy = ConsumeResult::failure(
            "CONSUME1",
            1,
            &ConsumeError::LockBusy {
                resource: "account:1".to_string(),
            },
        );
        assert!(busy.is_retryable());
        assert_eq!(busy.outcome(), "ACCOUNT_BUSY");

        let denied = ConsumeResult::failure("CONSUME1", 1, &ConsumeError::PaymentPasswordRequired);
        assert!(!denied.is_retryable());
    }
}
