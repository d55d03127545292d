//! 限额策略仓储

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;

use super::traits::LimitPolicyStore;
use crate::error::Result;
use crate::models::{LimitPolicy, LimitScope};

pub struct LimitPolicyRepository {
    pool: PgPool,
}

impl LimitPolicyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_by_scope(&self, scope: LimitScope, target: &str) -> Result<Vec<LimitPolicy>> {
        let policies = sqlx::query_as::<_, LimitPolicy>(
            r#"
            SELECT scope, target, single_limit, daily_limit, weekly_limit, monthly_limit,
                   daily_count_limit, weekly_count_limit, monthly_count_limit,
                   time_slots, priority, enabled
            FROM consume_limit_policies
            WHERE scope = $1 AND target = $2 AND enabled = true
            ORDER BY priority DESC
            "#,
        )
        .bind(scope)
        .bind(target)
        .fetch_all(&self.pool)
        .await?;

        Ok(policies)
    }

    pub async fn upsert(&self, policy: &LimitPolicy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consume_limit_policies
                (scope, target, single_limit, daily_limit, weekly_limit, monthly_limit,
                 daily_count_limit, weekly_count_limit, monthly_count_limit,
                 time_slots, priority, enabled, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            ON CONFLICT (scope, target) DO UPDATE SET
                single_limit = EXCLUDED.single_limit,
                daily_limit = EXCLUDED.daily_limit,
                weekly_limit = EXCLUDED.weekly_limit,
                monthly_limit = EXCLUDED.monthly_limit,
                daily_count_limit = EXCLUDED.daily_count_limit,
                weekly_count_limit = EXCLUDED.weekly_count_limit,
                monthly_count_limit = EXCLUDED.monthly_count_limit,
                time_slots = EXCLUDED.time_slots,
                priority = EXCLUDED.priority,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()
            "#,
        )
        .bind(policy.scope)
        .bind(&policy.target)
        .bind(policy.bounds.single_limit)
        .bind(policy.bounds.daily_limit)
        .bind(policy.bounds.weekly_limit)
        .bind(policy.bounds.monthly_limit)
        .bind(policy.bounds.daily_count_limit)
        .bind(policy.bounds.weekly_count_limit)
        .bind(policy.bounds.monthly_count_limit)
        .bind(Json(&policy.time_slots))
        .bind(policy.priority)
        .bind(policy.enabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl LimitPolicyStore for LimitPolicyRepository {
    async fn list_by_scope(&self, scope: LimitScope, target: &str) -> Result<Vec<LimitPolicy>> {
        self.list_by_scope(scope, target).await
    }

    async fn upsert(&self, policy: &LimitPolicy) -> Result<()> {
        self.upsert(policy).await
    }
}
