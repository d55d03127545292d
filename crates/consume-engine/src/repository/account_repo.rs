//! 账户仓储
//!
//! 余额变更只有一条路径：带版本号条件的 UPDATE。

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;

use super::traits::AccountStore;
use crate::error::Result;
use crate::models::{Account, AccountStatus};

const ACCOUNT_COLUMNS: &str = "account_id, person_id, balance, frozen_amount, credit_limit, \
                               status, version, created_at, updated_at";

pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, account_id: i64) -> Result<Option<Account>> {
        let sql = format!(
            "SELECT {} FROM consume_accounts WHERE account_id = $1",
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    pub async fn get_by_person(&self, person_id: i64) -> Result<Option<Account>> {
        let sql = format!(
            "SELECT {} FROM consume_accounts WHERE person_id = $1",
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(person_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    pub async fn create(&self, account: &Account) -> Result<Account> {
        let sql = format!(
            r#"
            INSERT INTO consume_accounts
                (person_id, balance, frozen_amount, credit_limit, status, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );
        let created = sqlx::query_as::<_, Account>(&sql)
            .bind(account.person_id)
            .bind(account.balance)
            .bind(account.frozen_amount)
            .bind(account.credit_limit)
            .bind(account.status)
            .bind(account.version)
            .bind(account.created_at)
            .bind(account.updated_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(created)
    }

    /// 条件更新余额
    ///
    /// `UPDATE ... WHERE account_id = ? AND version = ?`，影响行数为 0 说明并发写入者已胜出。
    pub async fn compare_and_swap_balance(
        &self,
        account_id: i64,
        expected_version: i64,
        new_balance: Decimal,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE consume_accounts
            SET balance = $3, version = version + 1, updated_at = NOW()
            WHERE account_id = $1 AND version = $2
            "#,
        )
        .bind(account_id)
        .bind(expected_version)
        .bind(new_balance)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn update_status(&self, account_id: i64, status: AccountStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE consume_accounts
            SET status = $2, updated_at = NOW()
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AccountStore for AccountRepository {
    async fn get(&self, account_id: i64) -> Result<Option<Account>> {
        self.get(account_id).await
    }

    async fn get_by_person(&self, person_id: i64) -> Result<Option<Account>> {
        self.get_by_person(person_id).await
    }

    async fn create(&self, account: &Account) -> Result<Account> {
        self.create(account).await
    }

    async fn compare_and_swap_balance(
        &self,
        account_id: i64,
        expected_version: i64,
        new_balance: Decimal,
    ) -> Result<bool> {
        self.compare_and_swap_balance(account_id, expected_version, new_balance)
            .await
    }

    async fn update_status(&self, account_id: i64, status: AccountStatus) -> Result<()> {
        self.update_status(account_id, status).await
    }
}
