//! 命令行接口
//!
//! - `migrate` - 执行数据库迁移
//! - `open-account` - 开户
//! - `consume` / `recharge` / `refund` - 资金操作
//! - `query` / `verify` / `stats` / `usage` - 查询与核对
//! - `freeze` / `unfreeze` - 临时冻结
//!
//! ```bash
//! consume-engine consume -p 1001 -a 12.50 --device POS-01
//! consume-engine refund -o CONSUME2024030612000012345678 --reason 重复扣款
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::CommandRunner;
