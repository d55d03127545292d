//! 服务层
//!
//! 交易引擎及其组合的各个协作组件。
//!
//! ## 模块结构
//!
//! - `dto`: 请求与结果
//! - `idempotency`: 订单号幂等守卫
//! - `limit_resolver`: 多作用域限额合并与校验
//! - `statistics`: 日/周/月消费统计
//! - `security`: 冻结登记、权限与支付密码接口
//! - `consistency`: 账户锁 + CAS + 补偿
//! - `engine`: 交易引擎入口

pub mod consistency;
pub mod dto;
pub mod engine;
pub mod idempotency;
pub mod limit_resolver;
pub mod security;
pub mod statistics;

pub use consistency::{Committed, ConsistencyCoordinator, ConsistencyReport, Mutation, RecordWrite};
pub use dto::{ConsumeRequest, ConsumeResult, RechargeRequest};
pub use engine::{EngineComponents, TransactionEngine};
pub use idempotency::IdempotencyGuard;
pub use limit_resolver::{LimitCheck, LimitConflict, LimitResolver};
pub use security::{
    AllowAllPermissions, FreezeRegistry, PasswordVerification, PaymentPasswordVerifier,
    PermissionDecision, PermissionValidator, UnconfiguredPasswordVerifier,
};
pub use statistics::ConsumeStatisticsAggregator;
