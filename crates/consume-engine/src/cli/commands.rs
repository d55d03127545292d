//! CLI 命令定义

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

/// 消费交易引擎命令行工具
#[derive(Parser, Debug)]
#[command(name = "consume-engine")]
#[command(version, about = "消费交易引擎运维工具")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 服务名，决定加载 config/{service}.toml
    #[arg(long, default_value = "consume-engine")]
    pub service: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 执行数据库迁移
    Migrate {
        #[arg(long, default_value = "migrations")]
        dir: PathBuf,
    },

    /// 开户
    OpenAccount {
        #[arg(short, long)]
        person: i64,

        /// 信用额度
        #[arg(long, default_value = "0")]
        credit_limit: Decimal,
    },

    /// 发起一笔消费
    Consume {
        #[arg(short, long)]
        person: i64,

        #[arg(short, long)]
        amount: Decimal,

        /// 订单号，不填时自动生成
        #[arg(short, long)]
        order_no: Option<String>,

        #[arg(long)]
        device: Option<String>,

        #[arg(long)]
        region: Option<String>,

        /// 消费模式
        #[arg(long)]
        mode: Option<String>,

        #[arg(long)]
        password: Option<String>,

        /// 可重试错误时自动以同一订单号重试
        #[arg(long)]
        retry: bool,
    },

    /// 充值
    Recharge {
        #[arg(short, long)]
        person: i64,

        #[arg(short, long)]
        amount: Decimal,

        #[arg(short, long)]
        order_no: Option<String>,
    },

    /// 退款
    Refund {
        #[arg(short, long)]
        order_no: String,

        #[arg(long, default_value = "")]
        reason: String,
    },

    /// 按订单号查询结果
    Query {
        #[arg(short, long)]
        order_no: String,
    },

    /// 核对账户余额与流水
    Verify {
        #[arg(short, long)]
        person: i64,
    },

    /// 日/周/月消费统计
    Stats {
        #[arg(short, long)]
        person: i64,
    },

    /// 限额使用情况与策略冲突
    Usage {
        #[arg(short, long)]
        person: i64,

        #[arg(long)]
        device: Option<String>,
    },

    /// 临时冻结
    Freeze {
        #[arg(short, long)]
        person: i64,

        #[arg(long)]
        reason: String,

        #[arg(long, default_value = "2")]
        hours: i64,
    },

    /// 解除临时冻结
    Unfreeze {
        #[arg(short, long)]
        person: i64,
    },
}
