use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};

use crate::model::{Ms, Span};

pub const SECOND_MS: Ms = 1_000;
pub const MINUTE_MS: Ms = 60 * SECOND_MS;
pub const HALF_HOUR_MS: Ms = 30 * MINUTE_MS;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// A calendar day on the local timeline, counted in days since 1970-01-01.
///
/// Displays as the 8-character `YYYYMMDD` key used to address day columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(i64);

impl DayKey {
    pub fn from_days(days: i64) -> Self {
        Self(days)
    }

    /// The day containing instant `t`.
    pub fn of(t: Ms) -> Self {
        Self(t.div_euclid(DAY_MS))
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self::from_date)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(i64::from(date.num_days_from_ce()) - EPOCH_DAYS_FROM_CE)
    }

    /// Parse a `YYYYMMDD` key.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year = s[0..4].parse().ok()?;
        let month = s[4..6].parse().ok()?;
        let day = s[6..8].parse().ok()?;
        Self::from_ymd(year, month, day)
    }

    pub fn days(self) -> i64 {
        self.0
    }

    pub fn date(self) -> Option<NaiveDate> {
        let ce = i32::try_from(self.0 + EPOCH_DAYS_FROM_CE).ok()?;
        NaiveDate::from_num_days_from_ce_opt(ce)
    }

    /// Local midnight at the start of this day.
    pub fn midnight(self) -> Ms {
        self.0 * DAY_MS
    }

    /// Instant at `hour:minute` on this day.
    pub fn at(self, hour: u32, minute: u32) -> Ms {
        self.midnight() + Ms::from(hour) * HOUR_MS + Ms::from(minute) * MINUTE_MS
    }

    pub fn add_days(self, n: i64) -> Self {
        Self(self.0 + n)
    }

    pub fn succ(self) -> Self {
        self.add_days(1)
    }

    /// Inclusive iterator from `self` to `last`. Empty when `last < self`.
    pub fn through(self, last: DayKey) -> impl Iterator<Item = DayKey> {
        (self.0..=last.0).map(DayKey)
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.date() {
            Some(date) => write!(f, "{}", date.format("%Y%m%d")),
            // Outside chrono's calendar range; only reachable with unvalidated input.
            None => write!(f, "day{}", self.0),
        }
    }
}

impl Serialize for DayKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Milliseconds elapsed since local midnight.
pub fn time_of_day(t: Ms) -> Ms {
    t.rem_euclid(DAY_MS)
}

pub fn hour_of(t: Ms) -> u32 {
    (time_of_day(t) / HOUR_MS) as u32
}

pub fn minute_of(t: Ms) -> u32 {
    ((time_of_day(t) % HOUR_MS) / MINUTE_MS) as u32
}

/// Starts exactly at midnight and lasts a whole number of days.
pub fn is_all_day(span: &Span) -> bool {
    time_of_day(span.start) == 0 && span.duration_ms() % DAY_MS == 0
}

/// Whole calendar days from `start`'s day to `end`'s day.
pub fn days_between(end: DayKey, start: DayKey) -> i64 {
    end.0 - start.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_key_formats_as_yyyymmdd() {
        let day = DayKey::from_ymd(2018, 6, 2).unwrap();
        assert_eq!(day.to_string(), "20180602");
        assert_eq!(DayKey::from_days(0).to_string(), "19700101");
    }

    #[test]
    fn day_key_parse() {
        let day = DayKey::parse("20240229").unwrap();
        assert_eq!(day, DayKey::from_ymd(2024, 2, 29).unwrap());
        assert!(DayKey::parse("20230229").is_none()); // not a leap year
        assert!(DayKey::parse("2024-01-01").is_none());
        assert!(DayKey::parse("2024011").is_none());
    }

    #[test]
    fn day_of_negative_instant() {
        // 1969-12-31T23:00 belongs to the day before the epoch
        assert_eq!(DayKey::of(-HOUR_MS), DayKey::from_days(-1));
        assert_eq!(hour_of(-HOUR_MS), 23);
    }

    #[test]
    fn hour_and_minute() {
        let day = DayKey::from_ymd(2024, 3, 10).unwrap();
        let t = day.at(14, 45);
        assert_eq!(DayKey::of(t), day);
        assert_eq!(hour_of(t), 14);
        assert_eq!(minute_of(t), 45);
    }

    #[test]
    fn all_day_classification() {
        let jan1 = DayKey::from_ymd(2024, 1, 1).unwrap();
        let two_days = Span::new(jan1.midnight(), jan1.add_days(2).midnight());
        assert!(is_all_day(&two_days));

        let almost = Span::new(jan1.midnight(), jan1.at(23, 59) + 59 * SECOND_MS);
        assert!(!is_all_day(&almost));

        let late_start = Span::new(jan1.at(0, 30), jan1.add_days(1).at(0, 30));
        assert!(!is_all_day(&late_start));
    }

    #[test]
    fn through_is_inclusive() {
        let a = DayKey::from_days(10);
        let days: Vec<_> = a.through(a.add_days(2)).collect();
        assert_eq!(days, vec![a, a.succ(), a.add_days(2)]);
        assert_eq!(a.through(a.add_days(-1)).count(), 0);
    }

    #[test]
    fn days_between_counts_boundaries() {
        let a = DayKey::from_days(100);
        assert_eq!(days_between(a.add_days(3), a), 3);
        assert_eq!(days_between(a, a), 0);
    }
}
