//! 消费交易引擎命令行入口

use anyhow::Result;
use clap::Parser;
use consume_shared::config::AppConfig;
use consume_shared::observability;
use tracing::{info, warn};

use consume_engine::EngineConfig;
use consume_engine::cli::{Cli, CommandRunner};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. 加载配置，失败时使用默认值
    let config = AppConfig::load(&cli.service).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    let engine_config = EngineConfig::load(&cli.service).unwrap_or_else(|e| {
        eprintln!("Failed to load engine config, using defaults: {}", e);
        EngineConfig::default()
    });

    // 2. 日志与指标
    let _guard = observability::init(&config.service_name, &config.observability)?;
    info!(environment = %config.environment, "Configuration loaded");
    if config.is_production() && !engine_config.risk.enabled {
        warn!("Risk assessment disabled in production");
    }

    // 3. 执行子命令
    CommandRunner::new(config, engine_config)
        .run(cli.command)
        .await
}
