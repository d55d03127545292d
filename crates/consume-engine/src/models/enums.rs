//! 消费引擎枚举类型定义
//!
//! 所有持久化枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};
use std::fmt;

/// 账户状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// 正常 - 可消费、可充值
    #[default]
    Active,
    /// 冻结 - 账户级停用，需人工解冻
    Frozen,
    /// 注销 - 不可再发生任何资金变动
    Closed,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Frozen => "FROZEN",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// 交易记录状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    #[default]
    Success,
    Failed,
    /// 处理中 - 外部渠道尚未给出终态
    Pending,
}

/// 交易记录类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    /// 消费扣款
    #[default]
    Consume,
    /// 充值入账
    Recharge,
    /// 消费退款
    Refund,
}

impl RecordType {
    /// 订单号前缀
    pub fn order_prefix(&self) -> &'static str {
        match self {
            Self::Consume => "CONSUME",
            Self::Recharge => "RECHARGE",
            Self::Refund => "REFUND",
        }
    }
}

/// 限额作用域
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitScope {
    /// 人员维度，始终适用
    User,
    /// 消费设备维度
    Device,
    /// 区域维度
    Region,
    /// 消费模式维度
    Mode,
}

impl LimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Device => "DEVICE",
            Self::Region => "REGION",
            Self::Mode => "MODE",
        }
    }
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 统计窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatWindow {
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for StatWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Daily => "日",
            Self::Weekly => "周",
            Self::Monthly => "月",
        };
        f.write_str(s)
    }
}

/// 风险等级
///
/// 按严重程度有序：SAFE < LOW < MEDIUM < HIGH
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Safe,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// 消费处理状态机
///
/// RECEIVED → IDEMPOTENCY_CHECKED → PERMISSION_CHECKED → ACCOUNT_VALIDATED → FROZEN_CHECK
/// → LIMIT_CHECKED → PASSWORD_CHECKED（条件）→ BALANCE_VALIDATED → COMMITTED → SUCCESS | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumeStage {
    Received,
    IdempotencyChecked,
    PermissionChecked,
    AccountValidated,
    FrozenCheck,
    LimitChecked,
    PasswordChecked,
    BalanceValidated,
    Committed,
    Success,
    Failed,
}

impl ConsumeStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}
