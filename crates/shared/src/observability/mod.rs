//! 日志与指标
//!
//! 进程启动时调用一次 [`init`]；业务代码只通过 `tracing` 宏与 [`metrics`] 中的记录函数上报。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::ObservabilityConfig;

/// 进程退出前保持存活，析构时输出一条关闭日志
#[derive(Debug)]
pub struct ObservabilityGuard {
    service_name: String,
    metrics_port: Option<u16>,
}

impl ObservabilityGuard {
    /// Prometheus 监听端口，未启用指标时为 None
    pub fn metrics_port(&self) -> Option<u16> {
        self.metrics_port
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!(service = %self.service_name, "Observability shut down");
    }
}

/// 安装日志 subscriber，按配置启动 Prometheus 导出
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    let metrics_port = if config.metrics_enabled {
        metrics::init(service_name, config.metrics_port)?;
        Some(config.metrics_port)
    } else {
        None
    };

    info!(
        service = %service_name,
        format = ?config.log_format,
        metrics_port = ?metrics_port,
        "Observability initialized"
    );
    Ok(ObservabilityGuard {
        service_name: service_name.to_string(),
        metrics_port,
    })
}
