//! 账户实体

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::AccountStatus;

/// 消费账户
///
/// 余额只能通过版本号 CAS 修改，每次余额变动版本号加一。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: i64,
    pub person_id: i64,
    pub balance: Decimal,
    /// 冻结金额，不可用于消费
    pub frozen_amount: Decimal,
    /// 信用额度，允许透支的上限
    pub credit_limit: Decimal,
    pub status: AccountStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// 新开户（余额为 0，版本号为 0）
    pub fn open(person_id: i64, credit_limit: Decimal) -> Self {
        let now = Utc::now();
        Self {
            account_id: 0,
            person_id,
            balance: super::money(Decimal::ZERO),
            frozen_amount: super::money(Decimal::ZERO),
            credit_limit: super::money(credit_limit),
            status: AccountStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 可用额度 = 余额 + 信用额度 - 冻结金额
    pub fn available(&self) -> Decimal {
        self.balance + self.credit_limit - self.frozen_amount
    }

    pub fn can_afford(&self, amount: Decimal) -> bool {
        self.available() >= amount
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}
