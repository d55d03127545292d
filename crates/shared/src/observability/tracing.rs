//! 日志初始化

use anyhow::Result;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogFormat, ObservabilityConfig};

/// 安装全局 subscriber，重复安装返回错误
///
/// JSON 格式在 span 关闭时输出耗时，便于按订单号聚合一次交易的完整链路。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_thread_ids(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter(&config.log_level))
        .with(layer)
        .try_init()?;
    Ok(())
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
