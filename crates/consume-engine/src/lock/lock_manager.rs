//! 缓存锁管理器
//!
//! 账户余额变更与人员风险分更新各自按 key 串行。

use consume_shared::CacheStore;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::cache_keys;
use crate::error::{ConsumeError, Result};

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// 持有上限，进程崩溃时锁最迟在此后释放
    pub ttl: Duration,
    /// 最多尝试次数
    pub retry_count: u32,
    /// 两次尝试之间的基础等待，实际等待附加至多一半的随机抖动
    pub retry_delay: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            retry_count: 50,
            retry_delay: Duration::from_millis(20),
        }
    }
}

/// 锁管理器
///
/// 每次加锁生成唯一的持有者标识（实例 ID + 序号），释放时比对标识，
/// 超时后被他人重新持有的锁不会被误删。
pub struct LockManager {
    cache: Arc<dyn CacheStore>,
    config: LockConfig,
    instance_id: Uuid,
    sequence: AtomicU64,
}

impl LockManager {
    pub fn new(cache: Arc<dyn CacheStore>, config: LockConfig) -> Self {
        Self {
            cache,
            config,
            instance_id: Uuid::now_v7(),
            sequence: AtomicU64::new(0),
        }
    }

    /// 获取账户锁
    ///
    /// 尝试次数用尽返回 `LockBusy`；缓存不可用时返回错误，不放行。
    #[instrument(skip(self))]
    pub async fn lock_account(&self, account_id: i64) -> Result<CacheLock> {
        self.acquire(
            cache_keys::account_lock(account_id),
            format!("account:{}", account_id),
        )
        .await
    }

    /// 获取人员风险分的更新锁
    #[instrument(skip(self))]
    pub async fn lock_risk_score(&self, person_id: i64) -> Result<CacheLock> {
        self.acquire(
            cache_keys::risk_score_lock(person_id),
            format!("risk_score:{}", person_id),
        )
        .await
    }

    async fn acquire(&self, key: String, resource: String) -> Result<CacheLock> {
        let owner = format!(
            "{}:{}",
            self.instance_id,
            self.sequence.fetch_add(1, Ordering::Relaxed)
        );
        let attempts = self.config.retry_count.max(1);

        for attempt in 1..=attempts {
            if self.cache.set_nx(&key, &owner, self.config.ttl).await? {
                if attempt > 1 {
                    debug!(attempt, resource = %resource, "Lock acquired after waiting");
                }
                return Ok(CacheLock {
                    resource,
                    key,
                    owner,
                    cache: self.cache.clone(),
                    acquired_at: Instant::now(),
                    released: false,
                });
            }
            if attempt < attempts {
                tokio::time::sleep(self.backoff()).await;
            }
        }

        warn!(attempts, resource = %resource, "Lock still held, giving up");
        consume_shared::observability::metrics::record_lock_busy();
        Err(ConsumeError::LockBusy { resource })
    }

    fn backoff(&self) -> Duration {
        let base = self.config.retry_delay.as_millis() as u64;
        let jitter = rand::rng().random_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }
}

/// 已持有的锁
///
/// 析构不能异步释放，必须显式调用 [`CacheLock::release`]，否则只能等待 TTL 过期。
pub struct CacheLock {
    resource: String,
    key: String,
    owner: String,
    cache: Arc<dyn CacheStore>,
    acquired_at: Instant,
    released: bool,
}

impl CacheLock {
    /// 被锁定的资源，如 `account:42`
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// 释放锁，只删除自己持有的那一把
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let held_ms = self.acquired_at.elapsed().as_millis() as u64;
        if self.cache.compare_and_delete(&self.key, &self.owner).await? {
            debug!(resource = %self.resource, held_ms, "Lock released");
        } else {
            warn!(resource = %self.resource, held_ms, "Lock expired before release");
        }
        Ok(())
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                resource = %self.resource,
                "Lock dropped without release, waiting for TTL"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consume_shared::MemoryCache;

    fn manager(cache: &MemoryCache, ttl: Duration, retry_count: u32) -> LockManager {
        LockManager::new(
            Arc::new(cache.clone()),
            LockConfig {
                ttl,
                retry_count,
                retry_delay: Duration::from_millis(4),
            },
        )
    }

    #[tokio::test]
    async fn test_lock_and_release() {
        let cache = MemoryCache::new();
        let locks = manager(&cache, Duration::from_secs(5), 1);

        let lock = locks.lock_account(1).await.unwrap();
        assert_eq!(lock.resource(), "account:1");
        assert!(cache.contains(&cache_keys::account_lock(1)));

        lock.release().await.unwrap();
        assert!(!cache.contains(&cache_keys::account_lock(1)));
    }

    #[tokio::test]
    async fn test_held_lock_reports_busy() {
        let cache = MemoryCache::new();
        let locks = manager(&cache, Duration::from_secs(5), 3);

        let held = locks.lock_account(2).await.unwrap();
        let err = locks.lock_account(2).await.err().unwrap();
        assert_eq!(err.error_code(), "ACCOUNT_BUSY");

        // 其他账户不受影响
        let other = locks.lock_account(3).await.unwrap();
        other.release().await.unwrap();
        held.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lock_is_not_deleted_by_old_holder() {
        let cache = MemoryCache::new();
        let short = manager(&cache, Duration::from_millis(5), 1);
        let normal = manager(&cache, Duration::from_secs(5), 1);

        let stale = short.lock_account(5).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let current = normal.lock_account(5).await.unwrap();

        stale.release().await.unwrap();
        assert!(cache.contains(&cache_keys::account_lock(5)));
        current.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let cache = MemoryCache::new();
        let locks = Arc::new(manager(&cache, Duration::from_secs(5), 200));

        let held = locks.lock_account(6).await.unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.lock_account(6).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release().await.unwrap();

        let acquired = waiter.await.unwrap().unwrap();
        acquired.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_risk_score_lock_is_separate_from_account_lock() {
        let cache = MemoryCache::new();
        let locks = manager(&cache, Duration::from_secs(5), 1);

        let account = locks.lock_account(7).await.unwrap();
        let score = locks.lock_risk_score(7).await.unwrap();
        assert_eq!(score.resource(), "risk_score:7");
        assert!(cache.contains(&cache_keys::risk_score_lock(7)));

        let err = locks.lock_risk_score(7).await.err().unwrap();
        assert_eq!(err.error_code(), "ACCOUNT_BUSY");

        score.release().await.unwrap();
        account.release().await.unwrap();
    }

    #[test]
    fn test_backoff_stays_within_jitter_bound() {
        let locks = manager(&MemoryCache::new(), Duration::from_secs(1), 1);
        for _ in 0..20 {
            let delay = locks.backoff();
            assert!(delay >= Duration::from_millis(4) && delay <= Duration::from_millis(6));
        }
    }
}
