//! PostgreSQL 连接池
//!
//! 账户、交易记录与限额策略的权威存储。启动时按退避策略等待数据库可用，
//! 迁移脚本目录在运行时传入。

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::{Result, SharedError};
use crate::retry::{RetryPolicy, retry};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池，连接失败时按 `connect_retries` 退避重试
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        let policy = RetryPolicy {
            max_retries: config.connect_retries,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        };
        let pool = retry(&policy, "database_connect", || {
            let options = options.clone();
            async move {
                options
                    .connect(&config.url)
                    .await
                    .map_err(SharedError::from)
            }
        })
        .await?;

        info!("Database connection pool created");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// 执行目录下尚未应用的迁移脚本
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub async fn run_migrations(&self, dir: &Path) -> Result<()> {
        let migrator = Migrator::new(dir)
            .await
            .map_err(|e| SharedError::Internal(format!("加载迁移脚本失败: {}", e)))?;
        info!(scripts = migrator.iter().count(), "Running database migrations");
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| SharedError::Internal(format!("执行迁移失败: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}
