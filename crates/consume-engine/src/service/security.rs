//! 安全相关协作方
//!
//! 冻结登记、消费权限校验与支付密码验证。权限与密码校验由外部系统提供，
//! 引擎只依赖这里定义的窄接口。

use async_trait::async_trait;
use chrono::TimeDelta;
use consume_shared::{CacheExt, CacheStore};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::cache_keys;
use crate::clock::Clock;
use crate::error::{ConsumeError, Result};
use crate::models::FreezeInfo;

/// 权限校验结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PermissionDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// 消费权限校验（人员 + 设备 + 区域）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionValidator: Send + Sync {
    async fn validate(
        &self,
        person_id: i64,
        device_id: Option<String>,
        region_id: Option<String>,
    ) -> Result<PermissionDecision>;
}

/// 不做限制的权限校验，适用于未接入权限系统的部署
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllPermissions;

#[async_trait]
impl PermissionValidator for AllowAllPermissions {
    async fn validate(
        &self,
        _person_id: i64,
        _device_id: Option<String>,
        _region_id: Option<String>,
    ) -> Result<PermissionDecision> {
        Ok(PermissionDecision::allow())
    }
}

/// 支付密码验证结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordVerification {
    pub success: bool,
    /// 剩余尝试次数
    pub remaining_attempts: Option<u32>,
    /// 连续错误次数过多已被锁定
    pub locked: bool,
}

impl PasswordVerification {
    pub fn passed() -> Self {
        Self {
            success: true,
            remaining_attempts: None,
            locked: false,
        }
    }

    pub fn rejected(remaining_attempts: Option<u32>) -> Self {
        Self {
            success: false,
            locked: remaining_attempts == Some(0),
            remaining_attempts,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentPasswordVerifier: Send + Sync {
    async fn verify(&self, person_id: i64, password: String) -> Result<PasswordVerification>;
}

/// 未接入密码服务时使用：任何需要验密的请求都以系统错误拒绝
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredPasswordVerifier;

#[async_trait]
impl PaymentPasswordVerifier for UnconfiguredPasswordVerifier {
    async fn verify(&self, _person_id: i64, _password: String) -> Result<PasswordVerification> {
        Err(ConsumeError::Internal("支付密码服务未配置".to_string()))
    }
}

/// 冻结登记
///
/// 冻结信息写入缓存并带过期时间，过期后自动解冻。
pub struct FreezeRegistry {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl FreezeRegistry {
    pub fn new(cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    #[instrument(skip(self))]
    pub async fn freeze(
        &self,
        person_id: i64,
        reason: &str,
        duration: TimeDelta,
    ) -> Result<FreezeInfo> {
        let ttl = duration
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
            .ok_or_else(|| ConsumeError::InvalidParam(format!("冻结时长无效: {}", duration)))?;

        let now = self.clock.now();
        let info = FreezeInfo {
            person_id,
            reason: reason.to_string(),
            frozen_at: now,
            expires_at: now + duration,
        };
        self.cache
            .set_json(&cache_keys::freeze(person_id), &info, ttl)
            .await?;
        info!(expires_at = %info.expires_at, "账户已临时冻结");
        Ok(info)
    }

    #[instrument(skip(self))]
    pub async fn unfreeze(&self, person_id: i64) -> Result<()> {
        self.cache.delete(&cache_keys::freeze(person_id)).await?;
        info!("账户已解冻");
        Ok(())
    }

    /// 当前生效的冻结信息
    ///
    /// 读取失败时返回错误，由调用方决定按冻结处理。
    pub async fn freeze_info(&self, person_id: i64) -> Result<Option<FreezeInfo>> {
        let info = self
            .cache
            .get_json::<FreezeInfo>(&cache_keys::freeze(person_id))
            .await?;
        let now = self.clock.now();
        Ok(info.filter(|info| info.expires_at > now))
    }
}
