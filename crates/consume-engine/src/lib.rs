//! 消费交易引擎
//!
//! 负责账户余额的扣款、充值与退款，保证资金变动在并发下的正确性。
//!
//! ## 核心功能
//!
//! - **消费处理**：参数、权限、账户、冻结、限额、支付密码、余额依次校验后提交
//! - **幂等**：订单号即幂等键，重复提交返回首次结果且不重复扣款
//! - **多作用域限额**：人员、设备、区域、消费模式四个作用域逐字段取最严
//! - **一致性**：账户锁 + 版本号 CAS，记录写入失败时补偿余额
//! - **风险评估**：提交后评估，仅供参考，可进入人工复核或触发临时冻结
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 仓储接口与 PostgreSQL / 内存实现
//! - `lock`: 账户互斥锁
//! - `risk`: 异常检测与风险分
//! - `service`: 交易引擎与各业务组件
//! - `bootstrap`: 按配置装配生产环境依赖
//! - `cli`: 运维命令行

pub mod bootstrap;
pub mod cache_keys;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod lock;
pub mod models;
pub mod repository;
pub mod risk;
pub mod service;

pub use clock::{BusinessCalendar, Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{ConsumeError, Result};
pub use lock::{CacheLock, LockConfig, LockManager};
pub use models::*;
pub use repository::{
    AccountRepository, AccountStore, LimitPolicyRepository, LimitPolicyStore, MemoryAccountStore,
    MemoryLimitPolicyStore, MemoryRecordStore, RecordRepository, RecordStore,
};
pub use risk::{MemoryReviewQueue, ReviewQueue, RiskScorer};
pub use service::{
    ConsumeRequest, ConsumeResult, EngineComponents, RechargeRequest, TransactionEngine,
};
