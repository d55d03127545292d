//! 调用方重试
//!
//! 交易失败后是否重试由调用方决定：只有标记为可重试的失败（并发冲突、锁竞争、
//! 瞬时存储故障）才会以指数退避重新执行，业务拒绝立即返回。

use serde::Deserialize;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// 可重试判定
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// 退避策略，对应配置中的 `[engine.retry]` 段
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 首次执行之外的最多重试次数
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 50,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 第 `retry` 次重试前的等待（从 0 计），不超过上限
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let delay_ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// 按策略执行，返回最后一次的结果
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut retries = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    debug!(operation = label, retries, "重试后成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if retries >= policy.max_retries {
            warn!(operation = label, retries, error = %err, "重试次数已用尽");
            return Err(err);
        }

        let delay = policy.backoff(retries);
        debug!(
            operation = label,
            retry = retries + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "可重试失败，退避后重试"
        );
        tokio::time::sleep(delay).await;
        retries += 1;
    }
}
