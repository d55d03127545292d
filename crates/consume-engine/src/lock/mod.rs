//! 互斥锁模块
//!
//! 基于缓存端口的 SET NX + TTL 实现按 key 粒度的互斥。
//! 同一账户的余额变更串行执行，不同账户完全并行；人员风险分的读改写同样串行。
//!
//! ```ignore
//! let locks = LockManager::new(cache, LockConfig::default());
//! let lock = locks.lock_account(42).await?;
//! // 受保护的余额变更
//! lock.release().await?;
//! ```

mod lock_manager;

pub use lock_manager::{CacheLock, LockConfig, LockManager};
