//! 时钟与业务日历
//!
//! 统计窗口、时段校验与风险检测都按业务时区（固定偏移）计算本地时间。

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta,
    Timelike, Utc,
};
use parking_lot::Mutex;

/// 时钟
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟，测试中用于固定或推进时间
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// 业务日历
///
/// 周从周一开始，月从 1 日开始，均以业务时区零点为界。
#[derive(Debug, Clone, Copy)]
pub struct BusinessCalendar {
    offset: FixedOffset,
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self::with_offset_hours(8)
    }
}

impl BusinessCalendar {
    /// 按东区小时数构造，非法偏移退回 UTC
    pub fn with_offset_hours(hours: i32) -> Self {
        let offset = FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.with_timezone(&self.offset).naive_local()
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local(at).date()
    }

    pub fn local_time(&self, at: DateTime<Utc>) -> NaiveTime {
        self.local(at).time()
    }

    pub fn local_hour(&self, at: DateTime<Utc>) -> u32 {
        self.local(at).hour()
    }

    /// 当天零点（UTC 表示）
    pub fn day_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.date_start(self.local_date(at))
    }

    /// 本周一零点
    pub fn week_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = self.local_date(at);
        let monday = date - TimeDelta::days(i64::from(date.weekday().num_days_from_monday()));
        self.date_start(monday)
    }

    /// 本月 1 日零点
    pub fn month_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = self.local_date(at);
        let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
        self.date_start(first)
    }

    fn date_start(&self, date: NaiveDate) -> DateTime<Utc> {
        self.to_utc(date.and_time(NaiveTime::MIN))
    }

    fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        (local - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()))).and_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_day_start_uses_business_offset() {
        let calendar = BusinessCalendar::default();
        // 北京时间 2024-03-06 01:30
        let at = utc("2024-03-05T17:30:00Z");
        assert_eq!(calendar.local_date(at), NaiveDate::from_ymd_opt(2024, 3, 6).unwrap());
        assert_eq!(calendar.day_start(at), utc("2024-03-05T16:00:00Z"));
        assert_eq!(calendar.local_hour(at), 1);
    }

    #[test]
    fn test_week_starts_on_monday() {
        let calendar = BusinessCalendar::default();
        // 2024-03-07 是周四
        let at = utc("2024-03-07T04:00:00Z");
        assert_eq!(calendar.week_start(at), utc("2024-03-03T16:00:00Z"));
    }

    #[test]
    fn test_month_start() {
        let calendar = BusinessCalendar::with_offset_hours(0);
        let at = utc("2024-02-29T23:59:59Z");
        assert_eq!(calendar.month_start(at), utc("2024-02-01T00:00:00Z"));
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(utc("2024-01-01T00:00:00Z"));
        clock.advance(TimeDelta::minutes(90));
        assert_eq!(clock.now(), utc("2024-01-01T01:30:00Z"));
    }
}
