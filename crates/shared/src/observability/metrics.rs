//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过 exporter 内置的 HTTP 监听端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// 安装 Prometheus recorder 并启动 `/metrics` 监听
///
/// 需要在 tokio 运行时内调用。
pub fn init(service_name: &str, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!("Metrics exporter listening on {}", addr);

    register_consume_metrics(service_name);
    Ok(())
}

/// 注册消费引擎指标描述
fn register_consume_metrics(service_name: &str) {
    metrics::describe_counter!("consume_requests_total", "Total number of consume requests");
    metrics::describe_histogram!(
        "consume_duration_seconds",
        "Consume processing duration in seconds"
    );
    metrics::describe_counter!(
        "consume_compensations_total",
        "Balance mutations reversed after a failed record write"
    );
    metrics::describe_counter!(
        "account_lock_busy_total",
        "Account lock acquisitions that gave up after the bounded wait"
    );
    metrics::describe_counter!("risk_assessments_total", "Total number of risk assessments");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一次消费请求
///
/// `result` 为 SUCCESS 或错误码。
#[inline]
pub fn record_consume(result: &str, duration_secs: f64) {
    metrics::counter!("consume_requests_total", "result" => result.to_string()).increment(1);
    metrics::histogram!("consume_duration_seconds", "result" => result.to_string())
        .record(duration_secs);
}

/// 记录一次补偿
#[inline]
pub fn record_compensation(operation: &str, succeeded: bool) {
    metrics::counter!(
        "consume_compensations_total",
        "operation" => operation.to_string(),
        "succeeded" => succeeded.to_string()
    )
    .increment(1);
}

/// 记录账户锁等待超时
#[inline]
pub fn record_lock_busy() {
    metrics::counter!("account_lock_busy_total").increment(1);
}

/// 记录风险评估结果
#[inline]
pub fn record_risk_assessment(level: &str) {
    metrics::counter!("risk_assessments_total", "level" => level.to_string()).increment(1);
}
