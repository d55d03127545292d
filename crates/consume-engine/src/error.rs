//! 消费引擎错误类型
//!
//! 每个错误对应一个稳定的错误码（见 [`ConsumeError::error_code`]），
//! 在结果边界统一转换为 `ConsumeResult` 的 errorCode 与 message。

use consume_shared::retry::Retryable;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{AccountStatus, StatWindow};

/// 消费引擎错误类型
#[derive(Debug, Error)]
pub enum ConsumeError {
    // === 请求校验 ===
    #[error("参数校验失败: {0}")]
    InvalidParam(String),

    #[error("无消费权限: {reason}")]
    PermissionDenied { reason: String },

    // === 账户状态 ===
    #[error("账户不存在: person_id={0}")]
    AccountNotFound(i64),

    #[error("账户状态不可用: person_id={person_id}, status={status}")]
    AccountInactive {
        person_id: i64,
        status: AccountStatus,
    },

    #[error("账户已冻结: {reason}")]
    AccountFrozen { reason: String },

    // === 限额 ===
    #[error("超过单笔限额: 限额 {limit}, 本次 {attempted}")]
    SingleLimitExceeded { limit: Decimal, attempted: Decimal },

    #[error("超过日累计限额: 限额 {limit}, 累计将达 {attempted}")]
    DailyLimitExceeded { limit: Decimal, attempted: Decimal },

    #[error("超过周累计限额: 限额 {limit}, 累计将达 {attempted}")]
    WeeklyLimitExceeded { limit: Decimal, attempted: Decimal },

    #[error("超过月累计限额: 限额 {limit}, 累计将达 {attempted}")]
    MonthlyLimitExceeded { limit: Decimal, attempted: Decimal },

    #[error("超过{window}消费次数限制: 限制 {limit} 次, 本次为第 {attempted} 次")]
    CountLimitExceeded {
        window: StatWindow,
        limit: i64,
        attempted: i64,
    },

    #[error("当前时段不允许消费: {current}")]
    TimeSlotDenied { current: String },

    // === 支付密码 ===
    #[error("需要验证支付密码")]
    PaymentPasswordRequired,

    #[error("支付密码错误: {message}")]
    PasswordIncorrect {
        message: String,
        remaining_attempts: Option<u32>,
    },

    // === 余额与并发 ===
    #[error("余额不足: 可用 {available}, 需要 {required}")]
    InsufficientBalance { available: Decimal, required: Decimal },

    #[error("数据已被修改，请重试: account_id={account_id}")]
    ConcurrentModification { account_id: i64 },

    #[error("消费记录保存失败，余额已恢复: order_no={order_no}")]
    RecordPersistenceFailed { order_no: String },

    #[error("账户操作繁忙，请稍后重试: {resource}")]
    LockBusy { resource: String },

    // === 订单 ===
    #[error("订单不存在: {0}")]
    OrderNotFound(String),

    #[error("订单已退款: {0}")]
    AlreadyRefunded(String),

    #[error("订单号重复: {0}")]
    DuplicateOrder(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("基础设施错误: {0}")]
    Infrastructure(#[from] consume_shared::SharedError),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 消费引擎 Result 类型别名
pub type Result<T> = std::result::Result<T, ConsumeError>;

/// 调用方可以用同一订单号安全重试的错误
impl Retryable for ConsumeError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrentModification { .. }
            | Self::RecordPersistenceFailed { .. }
            | Self::LockBusy { .. }
            | Self::Database(_) => true,
            Self::Infrastructure(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl ConsumeError {
    /// 是否为业务拒绝（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Infrastructure(_)
                | Self::Serialization(_)
                | Self::Internal(_)
                | Self::ConcurrentModification { .. }
                | Self::RecordPersistenceFailed { .. }
                | Self::LockBusy { .. }
        )
    }

    /// 获取错误码（用于结果响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidParam(_) => "INVALID_PARAM",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::AccountInactive { .. } => "ACCOUNT_INACTIVE",
            Self::AccountFrozen { .. } => "ACCOUNT_FROZEN",
            Self::SingleLimitExceeded { .. } => "SINGLE_LIMIT_EXCEEDED",
            Self::DailyLimitExceeded { .. } => "DAILY_LIMIT_EXCEEDED",
            Self::WeeklyLimitExceeded { .. } => "WEEKLY_LIMIT_EXCEEDED",
            Self::MonthlyLimitExceeded { .. } => "MONTHLY_LIMIT_EXCEEDED",
            Self::CountLimitExceeded { .. } => "COUNT_LIMIT_EXCEEDED",
            Self::TimeSlotDenied { .. } => "TIME_SLOT_DENIED",
            Self::PaymentPasswordRequired => "PAYMENT_PASSWORD_REQUIRED",
            Self::PasswordIncorrect { .. } => "PASSWORD_INCORRECT",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Self::RecordPersistenceFailed { .. } => "RECORD_PERSISTENCE_FAILED",
            Self::LockBusy { .. } => "ACCOUNT_BUSY",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::AlreadyRefunded(_) => "ALREADY_REFUNDED",
            Self::DuplicateOrder(_) => "DUPLICATE_ORDER",
            Self::Database(_)
            | Self::Infrastructure(_)
            | Self::Serialization(_)
            | Self::Internal(_) => "SYSTEM_ERROR",
        }
    }
}
