//! 风险画像实体
//!
//! 包含单次评估结果、人员累计风险分、行为基线与冻结信息

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::RiskLevel;

/// 异常检测器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectorKind {
    Amount,
    Frequency,
    TimeOfDay,
    Device,
    Location,
}

/// 单个检测器的输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorOutcome {
    pub kind: DetectorKind,
    /// 0-100
    pub score: f64,
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DetectorOutcome {
    /// 历史数据不足或输入缺失时的中性结果
    pub fn neutral(kind: DetectorKind) -> Self {
        Self {
            kind,
            score: 0.0,
            flagged: false,
            reason: None,
        }
    }

    pub fn flagged(kind: DetectorKind, score: f64, reason: impl Into<String>) -> Self {
        Self {
            kind,
            score: clamp_score(score),
            flagged: true,
            reason: Some(reason.into()),
        }
    }

    pub fn observed(kind: DetectorKind, score: f64) -> Self {
        Self {
            kind,
            score: clamp_score(score),
            flagged: false,
            reason: None,
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// 风险评估结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskResult {
    pub level: RiskLevel,
    pub score: f64,
    pub reasons: Vec<String>,
    pub detectors: Vec<DetectorOutcome>,
}

impl RiskResult {
    /// 合并检测器输出
    ///
    /// 总分取各检测器最高分；至少一个检测器告警时按总分定级
    /// （≥80 HIGH，≥60 MEDIUM，其余 LOW），无告警为 SAFE。
    pub fn combine(detectors: Vec<DetectorOutcome>) -> Self {
        let score = detectors.iter().map(|d| d.score).fold(0.0_f64, f64::max);
        let reasons: Vec<String> = detectors
            .iter()
            .filter(|d| d.flagged)
            .filter_map(|d| d.reason.clone())
            .collect();
        let any_flagged = detectors.iter().any(|d| d.flagged);

        let level = if !any_flagged {
            RiskLevel::Safe
        } else if score >= 80.0 {
            RiskLevel::High
        } else if score >= 60.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        Self {
            level,
            score,
            reasons,
            detectors,
        }
    }

    pub fn is_abnormal(&self) -> bool {
        self.level != RiskLevel::Safe
    }

    pub fn detector(&self, kind: DetectorKind) -> Option<&DetectorOutcome> {
        self.detectors.iter().find(|d| d.kind == kind)
    }
}

/// 人员累计风险分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScore {
    pub person_id: i64,
    /// 0-100
    pub score: i32,
    pub level: RiskLevel,
    pub last_update_time: DateTime<Utc>,
}

impl RiskScore {
    pub fn initial(person_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            person_id,
            score: 0,
            level: RiskLevel::Safe,
            last_update_time: now,
        }
    }

    /// 分数对应等级：≥80 HIGH，≥60 MEDIUM，≥30 LOW
    pub fn level_for(score: i32) -> RiskLevel {
        match score {
            s if s >= 80 => RiskLevel::High,
            s if s >= 60 => RiskLevel::Medium,
            s if s >= 30 => RiskLevel::Low,
            _ => RiskLevel::Safe,
        }
    }

    /// 根据一次评估更新分数
    ///
    /// 正常操作衰减 5 分；异常按等级累加 LOW +10、MEDIUM +20、HIGH +35，上限 100。
    pub fn apply(&mut self, assessed: RiskLevel, now: DateTime<Utc>) {
        self.score = match assessed {
            RiskLevel::Safe => (self.score - 5).max(0),
            RiskLevel::Low => (self.score + 10).min(100),
            RiskLevel::Medium => (self.score + 20).min(100),
            RiskLevel::High => (self.score + 35).min(100),
        };
        self.level = Self::level_for(self.score);
        self.last_update_time = now;
    }
}

/// 行为基线
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorBaseline {
    pub person_id: i64,
    /// 活跃小时内的平均操作次数
    pub hourly_operation_rate: f64,
    pub mean_amount: f64,
    pub amount_stddev: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_used_device: Option<String>,
    /// 建立基线所用的记录数，0 表示默认基线
    pub sample_size: usize,
    pub created_at: DateTime<Utc>,
}

impl BehaviorBaseline {
    pub fn default_for(person_id: i64, hourly_rate: f64, now: DateTime<Utc>) -> Self {
        Self {
            person_id,
            hourly_operation_rate: hourly_rate,
            mean_amount: 0.0,
            amount_stddev: 0.0,
            most_used_device: None,
            sample_size: 0,
            created_at: now,
        }
    }

    pub fn is_default(&self) -> bool {
        self.sample_size == 0
    }
}

/// 账户冻结信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreezeInfo {
    pub person_id: i64,
    pub reason: String,
    pub frozen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_takes_max_score() {
        let result = RiskResult::combine(vec![
            DetectorOutcome::observed(DetectorKind::Device, 30.0),
            DetectorOutcome::flagged(DetectorKind::Amount, 100.0, "金额异常"),
            DetectorOutcome::neutral(DetectorKind::Location),
        ]);
        assert_eq!(result.level, RiskLevel::High);
        assert_eq!(result.score, 100.0);
        assert_eq!(result.reasons, vec!["金额异常".to_string()]);
    }

    #[test]
    fn test_combine_levels() {
        let medium = RiskResult::combine(vec![DetectorOutcome::flagged(
            DetectorKind::TimeOfDay,
            70.0,
            "夜间",
        )]);
        assert_eq!(medium.level, RiskLevel::Medium);

        let low = RiskResult::combine(vec![DetectorOutcome::flagged(
            DetectorKind::Device,
            40.0,
            "低频设备",
        )]);
        assert_eq!(low.level, RiskLevel::Low);
    }

    #[test]
    fn test_combine_without_flags_is_safe() {
        let result = RiskResult::combine(vec![
            DetectorOutcome::observed(DetectorKind::Location, 90.0),
            DetectorOutcome::neutral(DetectorKind::Amount),
        ]);
        assert_eq!(result.level, RiskLevel::Safe);
        assert_eq!(result.score, 90.0);
        assert!(!result.is_abnormal());
    }

    #[test]
    fn test_scores_are_clamped() {
        let outcome = DetectorOutcome::flagged(DetectorKind::Amount, f64::INFINITY, "x");
        assert_eq!(outcome.score, 100.0);
        assert_eq!(DetectorOutcome::observed(DetectorKind::Device, -5.0).score, 0.0);
        assert_eq!(DetectorOutcome::observed(DetectorKind::Device, f64::NAN).score, 0.0);
    }

    #[test]
    fn test_risk_score_apply() {
        let now = Utc::now();
        let mut score = RiskScore::initial(1, now);

        score.apply(RiskLevel::Safe, now);
        assert_eq!(score.score, 0);

        score.apply(RiskLevel::High, now);
        score.apply(RiskLevel::Medium, now);
        assert_eq!(score.score, 55);
        assert_eq!(score.level, RiskLevel::Low);

        score.apply(RiskLevel::High, now);
        assert_eq!(score.score, 90);
        assert_eq!(score.level, RiskLevel::High);

        score.apply(RiskLevel::High, now);
        assert_eq!(score.score, 100);
    }
}
