//! 风险评分器

use chrono::{DateTime, TimeDelta, Utc};
use consume_shared::CacheStore;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::detectors;
use super::profile::BehaviorProfiles;
use super::review::{ReviewItem, ReviewQueue};
use crate::clock::{BusinessCalendar, Clock};
use crate::config::RiskSettings;
use crate::error::Result;
use crate::models::{
    BehaviorBaseline, ConsumeRecord, RecordQuery, RiskLevel, RiskResult, RiskScore,
};
use crate::repository::RecordStore;

/// 一次提交后评估的结果
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub result: RiskResult,
    /// 更新后的人员风险分
    pub score: RiskScore,
}

/// 风险评分器
///
/// 金额、频率、时段、设备、位置五个检测器独立打分，总分取最大值。
pub struct RiskScorer {
    records: Arc<dyn RecordStore>,
    profiles: BehaviorProfiles,
    review_queue: Arc<dyn ReviewQueue>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    settings: RiskSettings,
}

impl RiskScorer {
    pub fn new(
        records: Arc<dyn RecordStore>,
        cache: Arc<dyn CacheStore>,
        review_queue: Arc<dyn ReviewQueue>,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
        settings: RiskSettings,
    ) -> Self {
        let profiles = BehaviorProfiles::new(
            cache,
            records.clone(),
            clock.clone(),
            calendar,
            settings.clone(),
        );
        Self {
            records,
            profiles,
            review_queue,
            clock,
            calendar,
            settings,
        }
    }

    /// 对一笔候选交易打分（不修改任何状态）
    #[instrument(skip(self, amount))]
    pub async fn score(
        &self,
        person_id: i64,
        amount: Decimal,
        device_id: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<RiskResult> {
        self.evaluate(person_id, amount, device_id, client_ip, self.clock.now(), None)
            .await
    }

    /// 对已提交的记录评估并更新风险分
    ///
    /// 高风险结果提交人工复核，复核队列故障只记录日志。
    #[instrument(skip(self, record), fields(person_id = record.person_id, order_no = %record.order_no))]
    pub async fn assess(&self, record: &ConsumeRecord) -> Result<RiskAssessment> {
        let result = self
            .evaluate(
                record.person_id,
                record.amount,
                record.device_id.as_deref(),
                record.client_ip.as_deref(),
                record.pay_time,
                Some(&record.order_no),
            )
            .await?;
        consume_shared::observability::metrics::record_risk_assessment(result.level.as_str());

        let score = self
            .profiles
            .record_outcome(record.person_id, result.level)
            .await?;

        if result.level == RiskLevel::High {
            warn!(
                score = result.score,
                reasons = ?result.reasons,
                "高风险交易，提交人工复核"
            );
            let item = ReviewItem {
                person_id: record.person_id,
                order_no: record.order_no.clone(),
                result: result.clone(),
                submitted_at: self.clock.now(),
            };
            if let Err(e) = self.review_queue.submit(item).await {
                warn!(error = %e, "提交人工复核失败");
            }
        } else if result.is_abnormal() {
            info!(level = result.level.as_str(), reasons = ?result.reasons, "检测到异常行为");
        }

        Ok(RiskAssessment { result, score })
    }

    pub async fn risk_score(&self, person_id: i64) -> Result<RiskScore> {
        self.profiles.risk_score(person_id).await
    }

    pub async fn baseline(&self, person_id: i64) -> Result<BehaviorBaseline> {
        self.profiles.baseline(person_id).await
    }

    async fn evaluate(
        &self,
        person_id: i64,
        amount: Decimal,
        device_id: Option<&str>,
        client_ip: Option<&str>,
        at: DateTime<Utc>,
        exclude_order_no: Option<&str>,
    ) -> Result<RiskResult> {
        let is_other = |r: &ConsumeRecord| Some(r.order_no.as_str()) != exclude_order_no;

        let history_limit = self.settings.history_limit.max(1);
        let history: Vec<ConsumeRecord> = self
            .records
            .list(&RecordQuery::successful_consumes(person_id).limit(history_limit + 1))
            .await?
            .into_iter()
            .filter(|r| is_other(r))
            .take(history_limit as usize)
            .collect();

        let window = TimeDelta::minutes(self.settings.frequency_window_minutes);
        let window_count = self
            .records
            .list(&RecordQuery::successful_consumes(person_id).since(at - window))
            .await?
            .iter()
            .filter(|r| is_other(r) && r.pay_time <= at)
            .count()
            + 1;

        let baseline = self.profiles.baseline(person_id).await?;
        let hourly_rate = if baseline.hourly_operation_rate > 0.0 {
            baseline.hourly_operation_rate
        } else {
            self.settings.default_hourly_rate
        };

        let amounts: Vec<f64> = history
            .iter()
            .map(|r| r.amount.to_f64().unwrap_or(0.0))
            .collect();
        let hours: Vec<u32> = history
            .iter()
            .map(|r| self.calendar.local_hour(r.pay_time))
            .collect();
        let devices: Vec<Option<&str>> = history.iter().map(|r| r.device_id.as_deref()).collect();
        let ips: Vec<Option<&str>> = history.iter().map(|r| r.client_ip.as_deref()).collect();

        let outcomes = vec![
            detectors::detect_amount(amount.to_f64().unwrap_or(0.0), &amounts),
            detectors::detect_frequency(
                window_count,
                hourly_rate,
                self.settings.frequency_window_minutes,
            ),
            detectors::detect_time_of_day(self.calendar.local_hour(at), &hours),
            detectors::detect_device(device_id, &devices),
            detectors::detect_location(client_ip, &ips),
        ];

        Ok(RiskResult::combine(outcomes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Account, DetectorKind, RecordType};
    use crate::repository::MemoryRecordStore;
    use crate::risk::MemoryReviewQueue;
    use consume_shared::MemoryCache;
    use rust_decimal_macros::dec;

    // 北京时间 12:00
    fn noon() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-04T04:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn consume(order_no: &str, amount: Decimal, at: DateTime<Utc>) -> ConsumeRecord {
        let mut account = Account::open(1, Decimal::ZERO);
        account.account_id = 1;
        account.balance = dec!(5000);
        ConsumeRecord::committed(
            RecordType::Consume,
            order_no,
            &account,
            amount,
            account.balance - amount,
            at,
        )
    }

    struct Fixture {
        records: Arc<MemoryRecordStore>,
        queue: Arc<MemoryReviewQueue>,
        scorer: RiskScorer,
    }

    fn fixture() -> Fixture {
        let records = Arc::new(MemoryRecordStore::new());
        let queue = Arc::new(MemoryReviewQueue::new());
        let scorer = RiskScorer::new(
            records.clone(),
            Arc::new(MemoryCache::new()),
            queue.clone(),
            Arc::new(ManualClock::new(noon())),
            BusinessCalendar::default(),
            RiskSettings::default(),
        );
        Fixture {
            records,
            queue,
            scorer,
        }
    }

    #[tokio::test]
    async fn test_no_history_is_safe() {
        let f = fixture();
        let result = f.scorer.score(1, dec!(20), Some("POS-1"), None).await.unwrap();
        assert_eq!(result.level, RiskLevel::Safe);
        assert!(result.reasons.is_empty());
    }

    #[tokio::test]
    async fn test_large_amount_is_high_and_queued() {
        let f = fixture();
        // 历史每天一笔，避免频率检测干扰
        for day in 1..=10 {
            let at = noon() - TimeDelta::days(day);
            f.records
                .insert(&consume(&format!("H{}", day), dec!(10.00), at))
                .await
                .unwrap();
        }
        let current = consume("NOW", dec!(1000.00), noon());
        f.records.insert(&current).await.unwrap();

        let assessment = f.scorer.assess(&current).await.unwrap();
        assert_eq!(assessment.result.level, RiskLevel::High);
        let amount = assessment.result.detector(DetectorKind::Amount).unwrap();
        assert!(amount.flagged);
        assert_eq!(amount.score, 100.0);
        assert_eq!(assessment.score.score, 35);

        let pending = f.queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].order_no, "NOW");
    }

    #[tokio::test]
    async fn test_normal_activity_decays_score() {
        let f = fixture();
        let current = consume("ONE", dec!(12.00), noon());
        f.records.insert(&current).await.unwrap();

        let assessment = f.scorer.assess(&current).await.unwrap();
        assert_eq!(assessment.result.level, RiskLevel::Safe);
        assert_eq!(assessment.score.score, 0);
        assert!(f.queue.pending().is_empty());
    }
}
