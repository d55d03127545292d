//! 消费统计聚合
//!
//! 统计由交易记录重新计算，仅以短 TTL 缓存，缓存从不作为权威数据。

use chrono::{DateTime, Utc};
use consume_shared::{CacheExt, CacheStore};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::cache_keys;
use crate::clock::{BusinessCalendar, Clock};
use crate::error::Result;
use crate::models::{money, ConsumeRecord, ConsumeStatistics, RecordQuery};
use crate::repository::RecordStore;

pub struct ConsumeStatisticsAggregator {
    records: Arc<dyn RecordStore>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    ttl: Duration,
}

impl ConsumeStatisticsAggregator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
        ttl: Duration,
    ) -> Self {
        Self {
            records,
            cache,
            clock,
            calendar,
            ttl,
        }
    }

    /// 当前日/周/月统计（读穿缓存）
    ///
    /// 记录查询失败时返回全零统计且不写缓存。
    #[instrument(skip(self))]
    pub async fn statistics(&self, person_id: i64) -> ConsumeStatistics {
        let now = self.clock.now();
        let key = cache_keys::statistics(person_id, self.calendar.local_date(now));

        match self.cache.get_json::<ConsumeStatistics>(&key).await {
            Ok(Some(stats)) => return stats,
            Ok(None) => {}
            Err(e) => warn!(person_id, error = %e, "读取统计缓存失败"),
        }

        match self.compute(person_id, now).await {
            Ok(stats) => {
                if let Err(e) = self.cache.set_json(&key, &stats, self.ttl).await {
                    warn!(person_id, error = %e, "写入统计缓存失败");
                }
                stats
            }
            Err(e) => {
                warn!(person_id, error = %e, "统计查询失败，按零值处理");
                ConsumeStatistics::empty(person_id, self.calendar.local_date(now))
            }
        }
    }

    /// 删除当天的统计缓存
    pub async fn invalidate(&self, person_id: i64) {
        let key = cache_keys::statistics(person_id, self.calendar.local_date(self.clock.now()));
        if let Err(e) = self.cache.delete(&key).await {
            warn!(person_id, error = %e, "删除统计缓存失败");
        }
    }

    /// 从记录重新计算（不经过缓存）
    pub async fn compute(&self, person_id: i64, now: DateTime<Utc>) -> Result<ConsumeStatistics> {
        let day_start = self.calendar.day_start(now);
        let week_start = self.calendar.week_start(now);
        let month_start = self.calendar.month_start(now);
        let earliest = week_start.min(month_start);

        let records = self
            .records
            .list(
                &RecordQuery::successful_consumes(person_id)
                    .excluding_refunded()
                    .since(earliest),
            )
            .await?;

        let mut stats = ConsumeStatistics::empty(person_id, self.calendar.local_date(now));
        for record in records.iter().filter(|r| r.counts_toward_spending() && r.pay_time <= now) {
            if record.pay_time >= day_start {
                accumulate(&mut stats.daily_amount, &mut stats.daily_count, record);
            }
            if record.pay_time >= week_start {
                accumulate(&mut stats.weekly_amount, &mut stats.weekly_count, record);
            }
            if record.pay_time >= month_start {
                accumulate(&mut stats.monthly_amount, &mut stats.monthly_count, record);
            }
        }
        stats.daily_amount = money(stats.daily_amount);
        stats.weekly_amount = money(stats.weekly_amount);
        stats.monthly_amount = money(stats.monthly_amount);

        debug!(
            person_id,
            daily_amount = %stats.daily_amount,
            daily_count = stats.daily_count,
            "消费统计已计算"
        );
        Ok(stats)
    }
}

fn accumulate(amount: &mut Decimal, count: &mut i64, record: &ConsumeRecord) {
    *amount += record.amount;
    *count += 1;
}
