//! 异常检测器
//!
//! 五个相互独立的纯函数，输入当前操作与历史数据，输出 0-100 的异常分与是否告警。
//! 历史数据不足时返回中性结果。

use crate::models::{DetectorKind, DetectorOutcome};

/// 金额检测所需的最少历史条数
pub const MIN_AMOUNT_HISTORY: usize = 5;
/// 时段检测所需的最少历史条数
pub const MIN_TIME_HISTORY: usize = 10;
pub const MIN_DEVICE_HISTORY: usize = 5;
pub const MIN_LOCATION_HISTORY: usize = 3;

/// 样本均值与样本标准差（n-1）
pub fn mean_and_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// 金额检测：|z| > 3 或超过均值 5 倍
pub fn detect_amount(amount: f64, history: &[f64]) -> DetectorOutcome {
    if history.len() < MIN_AMOUNT_HISTORY {
        return DetectorOutcome::neutral(DetectorKind::Amount);
    }

    let (mean, stddev) = mean_and_stddev(history);
    let z = if stddev > 0.0 {
        (amount - mean) / stddev
    } else if (amount - mean).abs() < f64::EPSILON {
        0.0
    } else {
        f64::INFINITY
    };
    let is_large = mean > 0.0 && amount > mean * 5.0;

    let mut score = (z.abs() * 20.0).min(100.0);
    if is_large {
        score = score.max(80.0);
    }

    if z.abs() > 3.0 || is_large {
        let reason = if is_large {
            format!("大额消费: {:.2} 超过历史均值 {:.2} 的 5 倍", amount, mean)
        } else {
            format!("金额偏离历史均值: z={:.2}", z)
        };
        DetectorOutcome::flagged(DetectorKind::Amount, score, reason)
    } else {
        DetectorOutcome::observed(DetectorKind::Amount, score)
    }
}

/// 频率检测
///
/// `window_count` 为窗口内的操作数（含本次），期望值为基线小时频率按窗口折算。
pub fn detect_frequency(window_count: usize, hourly_rate: f64, window_minutes: i64) -> DetectorOutcome {
    let expected = hourly_rate * window_minutes as f64 / 60.0;
    let actual = window_count as f64;
    if expected <= 0.0 {
        return DetectorOutcome::neutral(DetectorKind::Frequency);
    }

    let deviation = (actual - expected) / expected;
    let is_high = actual > expected * 3.0;

    let mut score = (deviation * 100.0).min(100.0);
    if is_high {
        score = score.max(80.0);
    }

    if deviation > 2.0 || is_high {
        DetectorOutcome::flagged(
            DetectorKind::Frequency,
            score,
            format!(
                "操作频率异常: {} 分钟内 {} 次，期望 {:.1} 次",
                window_minutes, window_count, expected
            ),
        )
    } else {
        DetectorOutcome::observed(DetectorKind::Frequency, score)
    }
}

/// 时段检测：23:00-05:59 直接告警，其余时段与 24 小时均匀分布比较
pub fn detect_time_of_day(hour: u32, history_hours: &[u32]) -> DetectorOutcome {
    if hour >= 23 || hour <= 5 {
        return DetectorOutcome::flagged(
            DetectorKind::TimeOfDay,
            70.0,
            format!("异常时段消费: {} 点", hour),
        );
    }
    if history_hours.len() < MIN_TIME_HISTORY {
        return DetectorOutcome::neutral(DetectorKind::TimeOfDay);
    }

    let same_hour = history_hours.iter().filter(|h| **h == hour).count() as f64;
    let expected = history_hours.len() as f64 / 24.0;
    let score = (100.0 - same_hour / expected * 100.0).max(0.0);

    if score > 60.0 {
        DetectorOutcome::flagged(
            DetectorKind::TimeOfDay,
            score,
            format!("非常用时段消费: {} 点", hour),
        )
    } else {
        DetectorOutcome::observed(DetectorKind::TimeOfDay, score)
    }
}

/// 设备检测：首次使用告警 60，使用占比低于 10% 告警 40
pub fn detect_device(device_id: Option<&str>, history: &[Option<&str>]) -> DetectorOutcome {
    let Some(device_id) = device_id else {
        return DetectorOutcome::neutral(DetectorKind::Device);
    };
    if history.len() < MIN_DEVICE_HISTORY {
        return DetectorOutcome::neutral(DetectorKind::Device);
    }

    let used = history.iter().filter(|d| **d == Some(device_id)).count();
    if used == 0 {
        return DetectorOutcome::flagged(
            DetectorKind::Device,
            60.0,
            format!("首次使用设备: {}", device_id),
        );
    }

    let rate = used as f64 / history.len() as f64;
    if rate < 0.1 {
        DetectorOutcome::flagged(
            DetectorKind::Device,
            40.0,
            format!("低频设备: {}（占比 {:.0}%）", device_id, rate * 100.0),
        )
    } else {
        DetectorOutcome::observed(DetectorKind::Device, 100.0 - rate * 100.0)
    }
}

/// 位置检测：最近记录中从未出现的 IP 告警 80
pub fn detect_location(client_ip: Option<&str>, history: &[Option<&str>]) -> DetectorOutcome {
    let Some(client_ip) = client_ip else {
        return DetectorOutcome::neutral(DetectorKind::Location);
    };
    if history.len() < MIN_LOCATION_HISTORY {
        return DetectorOutcome::neutral(DetectorKind::Location);
    }

    let seen = history.iter().filter(|ip| **ip == Some(client_ip)).count();
    if seen == 0 {
        DetectorOutcome::flagged(
            DetectorKind::Location,
            80.0,
            format!("陌生地址: {}", client_ip),
        )
    } else {
        DetectorOutcome::observed(DetectorKind::Location, 100.0 - seen as f64 * 10.0)
    }
}
