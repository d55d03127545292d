//! 数据访问层
//!
//! - 仓储只负责持久化，不包含业务逻辑
//! - PostgreSQL 实现基于 SQLx，内存实现用于测试与单机嵌入
//! - 余额只能通过版本号 CAS 修改

mod account_repo;
mod limit_repo;
mod memory;
mod record_repo;
mod traits;

pub use account_repo::AccountRepository;
pub use limit_repo::LimitPolicyRepository;
pub use memory::{MemoryAccountStore, MemoryLimitPolicyStore, MemoryRecordStore};
pub use record_repo::RecordRepository;
pub use traits::*;
