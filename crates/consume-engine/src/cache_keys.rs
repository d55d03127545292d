//! 缓存 key 约定

use chrono::NaiveDate;

use crate::models::LimitScope;

const PREFIX: &str = "consume";

/// 账户读穿缓存
pub fn account(person_id: i64) -> String {
    format!("{}:account:{}", PREFIX, person_id)
}

/// 消费统计（按业务日期分 key）
pub fn statistics(person_id: i64, date: NaiveDate) -> String {
    format!("{}:statistics:{}:{}", PREFIX, person_id, date.format("%Y%m%d"))
}

pub fn limit_policy(scope: LimitScope, target: &str) -> String {
    format!("{}:limit:{}:{}", PREFIX, scope.as_str(), target)
}

/// 临时限额覆盖
pub fn temporary_limit(person_id: i64) -> String {
    format!("{}:limit:temporary:{}", PREFIX, person_id)
}

pub fn risk_score(person_id: i64) -> String {
    format!("{}:risk:score:{}", PREFIX, person_id)
}

pub fn risk_baseline(person_id: i64) -> String {
    format!("{}:risk:baseline:{}", PREFIX, person_id)
}

pub fn freeze(person_id: i64) -> String {
    format!("{}:freeze:{}", PREFIX, person_id)
}

/// 账户互斥锁
pub fn account_lock(account_id: i64) -> String {
    format!("{}:lock:account:{}", PREFIX, account_id)
}

/// 风险分更新锁
pub fn risk_score_lock(person_id: i64) -> String {
    format!("{}:lock:risk:{}", PREFIX, person_id)
}
