//! 消费引擎领域模型
//!
//! 包含账户、交易记录、限额策略、统计与风险画像等实体定义

pub mod account;
pub mod enums;
pub mod limit;
pub mod record;
pub mod risk;
pub mod statistics;

use rust_decimal::{Decimal, RoundingStrategy};

pub use account::Account;
pub use enums::{
    AccountStatus, ConsumeStage, LimitScope, RecordStatus, RecordType, RiskLevel, StatWindow,
};
pub use limit::{EffectivePolicy, LimitBounds, LimitContext, LimitPolicy, TimeSlot};
pub use record::{ConsumeRecord, RecordAudit, RecordQuery};
pub use risk::{
    BehaviorBaseline, DetectorKind, DetectorOutcome, FreezeInfo, RiskResult, RiskScore,
};
pub use statistics::{ConsumeStatistics, LimitUsageReport, WindowUsage};

/// 金额精度（分）
pub const MONEY_SCALE: u32 = 2;

/// 规整金额：四舍五入到分，并固定两位小数表示
///
/// 统一表示后，内存构造的值与数据库 NUMERIC(18,2) 读回的值完全一致。
pub fn money(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}
