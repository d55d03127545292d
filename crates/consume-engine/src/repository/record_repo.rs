//! 交易记录仓储

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use super::traits::RecordStore;
use crate::error::{ConsumeError, Result};
use crate::models::{ConsumeRecord, RecordQuery};

const RECORD_COLUMNS: &str = "id, order_no, person_id, account_id, record_type, amount, \
                              balance_before, balance_after, status, consumption_mode, device_id, \
                              region_id, client_ip, currency, pay_time, error_code, error_message, \
                              refunded, refund_time, refund_reason, extend_data";

pub struct RecordRepository {
    pool: PgPool,
}

impl RecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_order_no(&self, order_no: &str) -> Result<Option<ConsumeRecord>> {
        let sql = format!(
            "SELECT {} FROM consume_records WHERE order_no = $1",
            RECORD_COLUMNS
        );
        let record = sqlx::query_as::<_, ConsumeRecord>(&sql)
            .bind(order_no)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    pub async fn insert(&self, record: &ConsumeRecord) -> Result<ConsumeRecord> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_in_tx(&mut *conn, record).await
    }

    /// 在给定连接（或事务）中插入记录
    ///
    /// 订单号唯一约束冲突转换为 `DuplicateOrder`。
    async fn insert_in_tx(conn: &mut PgConnection, record: &ConsumeRecord) -> Result<ConsumeRecord> {
        let sql = format!(
            r#"
            INSERT INTO consume_records
                (order_no, person_id, account_id, record_type, amount, balance_before,
                 balance_after, status, consumption_mode, device_id, region_id, client_ip,
                 currency, pay_time, error_code, error_message, refunded, refund_time,
                 refund_reason, extend_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20)
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );

        sqlx::query_as::<_, ConsumeRecord>(&sql)
            .bind(&record.order_no)
            .bind(record.person_id)
            .bind(record.account_id)
            .bind(record.record_type)
            .bind(record.amount)
            .bind(record.balance_before)
            .bind(record.balance_after)
            .bind(record.status)
            .bind(&record.consumption_mode)
            .bind(&record.device_id)
            .bind(&record.region_id)
            .bind(&record.client_ip)
            .bind(&record.currency)
            .bind(record.pay_time)
            .bind(&record.error_code)
            .bind(&record.error_message)
            .bind(record.refunded)
            .bind(record.refund_time)
            .bind(&record.refund_reason)
            .bind(&record.extend_data)
            .fetch_one(conn)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    ConsumeError::DuplicateOrder(record.order_no.clone())
                }
                other => ConsumeError::Database(other),
            })
    }

    /// 动态条件查询
    pub async fn list(&self, query: &RecordQuery) -> Result<Vec<ConsumeRecord>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM consume_records WHERE person_id = ", RECORD_COLUMNS));
        builder.push_bind(query.person_id);

        if let Some(record_type) = query.record_type {
            builder.push(" AND record_type = ").push_bind(record_type);
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(from) = query.from {
            builder.push(" AND pay_time >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            builder.push(" AND pay_time < ").push_bind(to);
        }
        if !query.include_refunded {
            builder.push(" AND refunded = false");
        }
        builder.push(" ORDER BY pay_time DESC, id DESC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let records = builder
            .build_query_as::<ConsumeRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    /// 事务内：标记原消费已退款，再写入退款记录
    pub async fn insert_refund(
        &self,
        refund: &ConsumeRecord,
        original_order_no: &str,
        reason: &str,
    ) -> Result<ConsumeRecord> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            UPDATE consume_records
            SET refunded = true, refund_time = $2, refund_reason = $3
            WHERE order_no = $1 AND refunded = false
            "#,
        )
        .bind(original_order_no)
        .bind(refund.pay_time)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            let exists: Option<bool> =
                sqlx::query_scalar("SELECT refunded FROM consume_records WHERE order_no = $1")
                    .bind(original_order_no)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(match exists {
                Some(_) => ConsumeError::AlreadyRefunded(original_order_no.to_string()),
                None => ConsumeError::OrderNotFound(original_order_no.to_string()),
            });
        }

        let inserted = Self::insert_in_tx(&mut *tx, refund).await?;
        tx.commit().await?;

        Ok(inserted)
    }
}

#[async_trait]
impl RecordStore for RecordRepository {
    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<ConsumeRecord>> {
        self.find_by_order_no(order_no).await
    }

    async fn insert(&self, record: &ConsumeRecord) -> Result<ConsumeRecord> {
        self.insert(record).await
    }

    async fn list(&self, query: &RecordQuery) -> Result<Vec<ConsumeRecord>> {
        self.list(query).await
    }

    async fn insert_refund(
        &self,
        refund: &ConsumeRecord,
        original_order_no: &str,
        reason: &str,
    ) -> Result<ConsumeRecord> {
        self.insert_refund(refund, original_order_no, reason).await
    }
}
