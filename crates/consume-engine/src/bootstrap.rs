//! 生产环境装配
//!
//! PostgreSQL 仓储 + Redis 缓存；权限与支付密码未接入外部系统时使用默认实现。

use consume_shared::config::AppConfig;
use consume_shared::database::Database;
use consume_shared::RedisCache;
use std::sync::Arc;
use tracing::info;

use crate::clock::SystemClock;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::repository::{AccountRepository, LimitPolicyRepository, RecordRepository};
use crate::risk::MemoryReviewQueue;
use crate::service::{
    AllowAllPermissions, EngineComponents, TransactionEngine, UnconfiguredPasswordVerifier,
};

/// 连接数据库与缓存并构造引擎
pub async fn connect(app: &AppConfig, engine: EngineConfig) -> Result<(TransactionEngine, Database)> {
    let db = Database::connect(&app.database).await?;
    let pool = db.pool().clone();
    info!("Database connection established");

    let cache = Arc::new(RedisCache::new(&app.redis)?);
    cache.health_check().await?;
    info!("Redis connection established");

    let components = EngineComponents {
        accounts: Arc::new(AccountRepository::new(pool.clone())),
        records: Arc::new(RecordRepository::new(pool.clone())),
        policies: Arc::new(LimitPolicyRepository::new(pool)),
        cache,
        permissions: Arc::new(AllowAllPermissions),
        passwords: Arc::new(UnconfiguredPasswordVerifier),
        review_queue: Arc::new(MemoryReviewQueue::new()),
        clock: Arc::new(SystemClock),
    };
    Ok((TransactionEngine::new(components, engine), db))
}
