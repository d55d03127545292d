//! 行为画像：行为基线与人员累计风险分
//!
//! 两者都只存放在缓存中，丢失后基线重新计算、风险分从 0 开始。
//! 风险分的读改写在按人员的缓存锁内完成，多实例并发评估不会丢失累加。

use chrono::{DateTime, NaiveDate, Utc};
use consume_shared::{CacheExt, CacheStore};
use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::detectors::mean_and_stddev;
use crate::cache_keys;
use crate::clock::{BusinessCalendar, Clock};
use crate::config::RiskSettings;
use crate::error::Result;
use crate::lock::{LockConfig, LockManager};
use crate::models::{BehaviorBaseline, ConsumeRecord, RecordQuery, RiskLevel, RiskScore};
use crate::repository::RecordStore;

/// 建立基线所需的最少记录数
pub const MIN_BASELINE_RECORDS: usize = 10;
/// 建立基线时最多读取的记录数
const BASELINE_SAMPLE_LIMIT: i64 = 500;

fn score_lock_config() -> LockConfig {
    LockConfig {
        ttl: Duration::from_secs(5),
        retry_count: 100,
        retry_delay: Duration::from_millis(5),
    }
}

/// 由历史记录计算行为基线
///
/// 小时频率 = 记录数 / 有操作的（业务日期, 小时）数。
pub fn build_baseline(
    person_id: i64,
    records: &[ConsumeRecord],
    calendar: &BusinessCalendar,
    now: DateTime<Utc>,
) -> BehaviorBaseline {
    let amounts: Vec<f64> = records
        .iter()
        .map(|r| r.amount.to_f64().unwrap_or(0.0))
        .collect();
    let (mean_amount, amount_stddev) = mean_and_stddev(&amounts);

    let active_hours: HashSet<(NaiveDate, u32)> = records
        .iter()
        .map(|r| (calendar.local_date(r.pay_time), calendar.local_hour(r.pay_time)))
        .collect();
    let hourly_operation_rate = if active_hours.is_empty() {
        0.0
    } else {
        records.len() as f64 / active_hours.len() as f64
    };

    let mut device_counts: HashMap<&str, usize> = HashMap::new();
    for device in records.iter().filter_map(|r| r.device_id.as_deref()) {
        *device_counts.entry(device).or_default() += 1;
    }
    let most_used_device = device_counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(device, _)| device.to_string());

    BehaviorBaseline {
        person_id,
        hourly_operation_rate,
        mean_amount,
        amount_stddev,
        most_used_device,
        sample_size: records.len(),
        created_at: now,
    }
}

/// 行为画像存取
pub struct BehaviorProfiles {
    cache: Arc<dyn CacheStore>,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    settings: RiskSettings,
    score_locks: LockManager,
}

impl BehaviorProfiles {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
        settings: RiskSettings,
    ) -> Self {
        Self {
            score_locks: LockManager::new(cache.clone(), score_lock_config()),
            cache,
            records,
            clock,
            calendar,
            settings,
        }
    }

    /// 获取行为基线
    ///
    /// 缓存未命中时从记录计算；记录不足时返回默认基线且不缓存。
    pub async fn baseline(&self, person_id: i64) -> Result<BehaviorBaseline> {
        let key = cache_keys::risk_baseline(person_id);
        match self.cache.get_json::<BehaviorBaseline>(&key).await {
            Ok(Some(baseline)) => return Ok(baseline),
            Ok(None) => {}
            Err(e) => warn!(person_id, error = %e, "读取行为基线缓存失败"),
        }

        let now = self.clock.now();
        let records = self
            .records
            .list(&RecordQuery::successful_consumes(person_id).limit(BASELINE_SAMPLE_LIMIT))
            .await?;

        if records.len() < MIN_BASELINE_RECORDS {
            return Ok(BehaviorBaseline::default_for(
                person_id,
                self.settings.default_hourly_rate,
                now,
            ));
        }

        let baseline = build_baseline(person_id, &records, &self.calendar, now);
        debug!(
            person_id,
            sample_size = baseline.sample_size,
            hourly_rate = baseline.hourly_operation_rate,
            "行为基线已建立"
        );
        let ttl = Duration::from_secs(self.settings.baseline_cache_ttl_secs);
        if let Err(e) = self.cache.set_json(&key, &baseline, ttl).await {
            warn!(person_id, error = %e, "写入行为基线缓存失败");
        }
        Ok(baseline)
    }

    /// 当前风险分，从未评估过时为 0
    pub async fn risk_score(&self, person_id: i64) -> Result<RiskScore> {
        let cached = self
            .cache
            .get_json::<RiskScore>(&cache_keys::risk_score(person_id))
            .await?;
        Ok(cached.unwrap_or_else(|| RiskScore::initial(person_id, self.clock.now())))
    }

    /// 按评估结果更新风险分
    ///
    /// 更新锁等待超时返回 `LockBusy`，本次评估不计入分数。
    pub async fn record_outcome(&self, person_id: i64, assessed: RiskLevel) -> Result<RiskScore> {
        let lock = self.score_locks.lock_risk_score(person_id).await?;
        let updated = self.apply_outcome(person_id, assessed).await;
        if let Err(e) = lock.release().await {
            warn!(person_id, error = %e, "释放风险分锁失败");
        }
        updated
    }

    async fn apply_outcome(&self, person_id: i64, assessed: RiskLevel) -> Result<RiskScore> {
        let mut score = self.risk_score(person_id).await?;
        score.apply(assessed, self.clock.now());
        let ttl = Duration::from_secs(self.settings.score_cache_ttl_secs);
        self.cache
            .set_json(&cache_keys::risk_score(person_id), &score, ttl)
            .await?;
        Ok(score)
    }
}
