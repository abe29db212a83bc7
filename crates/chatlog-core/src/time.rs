//! Time helpers: half-open periods and the calendar arithmetic used to turn a
//! period into per-month or per-day log targets.
//!
//! All instants are UTC. Periods serialise as epoch milliseconds so that the
//! JSON bookkeeping and the binary codec agree on precision.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A point in time as stored in logs and periods.
pub type TimePoint = DateTime<Utc>;

/// Errors from parsing or constructing time values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("invalid time point: {0:?}")]
    InvalidTimePoint(String),
    #[error("period begins after it ends")]
    Reversed,
    #[error("timestamp out of range: {0}")]
    OutOfRange(i64),
}

// ---------------------------------------------------------------------------
// TimePeriod
// ---------------------------------------------------------------------------

/// A half-open interval `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PeriodRepr", into = "PeriodRepr")]
pub struct TimePeriod {
    begin: TimePoint,
    end: TimePoint,
}

#[derive(Serialize, Deserialize)]
struct PeriodRepr {
    begin: i64,
    end: i64,
}

impl TryFrom<PeriodRepr> for TimePeriod {
    type Error = TimeError;

    fn try_from(repr: PeriodRepr) -> Result<Self, Self::Error> {
        TimePeriod::from_millis(repr.begin, repr.end)
    }
}

impl From<TimePeriod> for PeriodRepr {
    fn from(period: TimePeriod) -> Self {
        PeriodRepr {
            begin: period.begin.timestamp_millis(),
            end: period.end.timestamp_millis(),
        }
    }
}

impl TimePeriod {
    /// Build a period, rejecting `begin > end`.
    pub fn new(begin: TimePoint, end: TimePoint) -> Result<Self, TimeError> {
        if begin > end {
            return Err(TimeError::Reversed);
        }
        Ok(Self { begin, end })
    }

    /// Build a period from epoch milliseconds.
    pub fn from_millis(begin: i64, end: i64) -> Result<Self, TimeError> {
        Self::new(millis_to_time(begin)?, millis_to_time(end)?)
    }

    /// The calendar month `year-month`.
    /// The last representable month ends at [`end_of_time`].
    pub fn month(ym: YearMonth) -> Self {
        Self {
            begin: midnight(ym.first_day()),
            end: ym
                .next()
                .map(|next| midnight(next.first_day()))
                .unwrap_or_else(end_of_time),
        }
    }

    /// The calendar day `date`.
    pub fn day(date: NaiveDate) -> Self {
        let begin = midnight(date);
        Self {
            begin,
            end: begin
                .checked_add_signed(Duration::days(1))
                .unwrap_or_else(end_of_time),
        }
    }

    /// The calendar month containing `now`.
    pub fn current_month(now: TimePoint) -> Self {
        Self::month(YearMonth::of(now.date_naive()))
    }

    pub fn begin(&self) -> TimePoint {
        self.begin
    }

    pub fn end(&self) -> TimePoint {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// `true` when `begin <= point < end`.
    pub fn is_inside(&self, point: TimePoint) -> bool {
        point >= self.begin && point < self.end
    }

    /// Every calendar month intersecting the period, in order.
    pub fn year_months(&self) -> Vec<YearMonth> {
        let Some(last) = self.last_instant() else {
            return Vec::new();
        };
        let mut months = Vec::new();
        let mut ym = Some(YearMonth::of(self.begin.date_naive()));
        let stop = YearMonth::of(last.date_naive());
        while let Some(current) = ym.filter(|ym| *ym <= stop) {
            months.push(current);
            ym = current.next();
        }
        months
    }

    /// `year_months().len()` without building the list.
    pub fn month_count(&self) -> usize {
        let Some(last) = self.last_instant() else {
            return 0;
        };
        let (first, last) = (YearMonth::of(self.begin.date_naive()), YearMonth::of(last.date_naive()));
        let months = i64::from(last.year - first.year) * 12 + i64::from(last.month)
            - i64::from(first.month)
            + 1;
        usize::try_from(months).unwrap_or(0)
    }

    /// `dates().len()` without building the list.
    pub fn day_count(&self) -> usize {
        let Some(last) = self.last_instant() else {
            return 0;
        };
        let days = (last.date_naive() - self.begin.date_naive()).num_days() + 1;
        usize::try_from(days).unwrap_or(0)
    }

    /// Every calendar day intersecting the period, in order.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let Some(last) = self.last_instant() else {
            return Vec::new();
        };
        self.begin
            .date_naive()
            .iter_days()
            .take_while(|d| *d <= last.date_naive())
            .collect()
    }

    fn last_instant(&self) -> Option<TimePoint> {
        (!self.is_empty()).then(|| self.end - Duration::nanoseconds(1))
    }
}

impl std::fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.begin.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

// ---------------------------------------------------------------------------
// YearMonth
// ---------------------------------------------------------------------------

/// A calendar month. Ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    /// 1-based month number.
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    /// The following month, or `None` past the last representable date.
    pub fn next(&self) -> Option<Self> {
        self.first_day()
            .checked_add_months(Months::new(1))
            .map(Self::of)
    }

    /// English month name, e.g. `"January"`.
    pub fn month_name(&self) -> &'static str {
        u8::try_from(self.month)
            .ok()
            .and_then(|m| chrono::Month::try_from(m).ok())
            .map(|m| m.name())
            .unwrap_or("Unknown")
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a user-supplied time point.
///
/// Accepts `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, `YYYY-MM-DD-HH`,
/// `YYYY-MM-DD-HH-MM` and `YYYY-MM-DD-HH-MM-SS`. Missing components default
/// to the start of the unit.
pub fn parse_time_point(text: &str) -> Result<TimePoint, TimeError> {
    let invalid = || TimeError::InvalidTimePoint(text.to_string());

    let parts: Vec<&str> = text.trim().split('-').collect();
    if parts.is_empty() || parts.len() > 6 {
        return Err(invalid());
    }
    let mut fields = [0u32, 1, 1, 0, 0, 0];
    for (slot, part) in fields.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        *slot = part.parse().map_err(|_| invalid())?;
    }
    let [year, month, day, hour, minute, second] = fields;
    let year = i32::try_from(year).map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .map(|dt| dt.and_utc())
        .ok_or_else(invalid)
}

/// Parse a `[begin, end)` period from two user-supplied time points.
pub fn parse_time_period(begin: &str, end: &str) -> Result<TimePeriod, TimeError> {
    TimePeriod::new(parse_time_point(begin)?, parse_time_point(end)?)
}

/// The latest instant a period can end at, truncated to milliseconds.
pub fn end_of_time() -> TimePoint {
    DateTime::from_timestamp_millis(DateTime::<Utc>::MAX_UTC.timestamp_millis())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn midnight(date: NaiveDate) -> TimePoint {
    date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

/// Convert epoch milliseconds into a [`TimePoint`].
pub fn millis_to_time(millis: i64) -> Result<TimePoint, TimeError> {
    DateTime::from_timestamp_millis(millis).ok_or(TimeError::OutOfRange(millis))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(y: i32, m: u32, d: u32) -> TimePoint {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn period_is_half_open() {
        let period = TimePeriod::new(at(2020, 1, 1), at(2020, 2, 1)).unwrap();
        assert!(period.is_inside(period.begin()));
        assert!(!period.is_inside(period.end()));
        assert!(period.is_inside(at(2020, 1, 31)));
    }

    #[test]
    fn reversed_period_is_rejected() {
        assert_eq!(
            TimePeriod::new(at(2020, 2, 1), at(2020, 1, 1)),
            Err(TimeError::Reversed)
        );
    }

    #[test]
    fn month_period_spans_calendar_month() {
        let period = TimePeriod::month(YearMonth::new(2020, 12).unwrap());
        assert_eq!(period.begin(), at(2020, 12, 1));
        assert_eq!(period.end(), at(2021, 1, 1));
    }

    #[test]
    fn parse_time_point_granularities() {
        assert_eq!(parse_time_point("2020").unwrap(), at(2020, 1, 1));
        assert_eq!(parse_time_point("2020-03").unwrap(), at(2020, 3, 1));
        assert_eq!(parse_time_point("2020-03-04").unwrap(), at(2020, 3, 4));
        assert_eq!(
            parse_time_point("2020-03-04-05-06-07").unwrap(),
            Utc.with_ymd_and_hms(2020, 3, 4, 5, 6, 7).unwrap()
        );
        assert!(parse_time_point("2020-13").is_err());
        assert!(parse_time_point("yesterday").is_err());
        assert!(parse_time_point("2020--01").is_err());
    }

    #[test]
    fn year_months_excludes_exclusive_end() {
        let period = TimePeriod::new(at(2019, 11, 15), at(2020, 2, 1)).unwrap();
        let months: Vec<(i32, u32)> = period
            .year_months()
            .iter()
            .map(|ym| (ym.year, ym.month))
            .collect();
        assert_eq!(months, vec![(2019, 11), (2019, 12), (2020, 1)]);
    }

    #[test]
    fn dates_cover_partial_days() {
        let period = TimePeriod::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 3, 1, 0, 0).unwrap(),
        )
        .unwrap();
        assert_eq!(period.dates().len(), 3);
        assert!(TimePeriod::new(at(2020, 1, 1), at(2020, 1, 1))
            .unwrap()
            .dates()
            .is_empty());
    }

    #[test]
    fn period_json_uses_epoch_millis() {
        let period = TimePeriod::new(at(2020, 1, 1), at(2020, 2, 1)).unwrap();
        let json = serde_json::to_value(period).unwrap();
        assert_eq!(json["begin"], 1_577_836_800_000i64);
        let back: TimePeriod = serde_json::from_value(json).unwrap();
        assert_eq!(back, period);
    }

    #[test]
    fn last_representable_month_terminates() {
        let max = YearMonth::of(NaiveDate::MAX);
        assert_eq!(max.next(), None);
        assert_eq!(
            YearMonth::new(2020, 12).unwrap().next(),
            YearMonth::new(2021, 1)
        );

        let november = YearMonth::new(max.year, 11).unwrap();
        let period = TimePeriod::new(midnight(november.first_day()), end_of_time()).unwrap();
        assert_eq!(period.year_months(), vec![november, max]);
        assert_eq!(period.month_count(), 2);

        let last = TimePeriod::month(max);
        assert_eq!(last.end(), end_of_time());
        assert!(last.is_inside(midnight(NaiveDate::MAX)));
        assert_eq!(TimePeriod::day(NaiveDate::MAX).end(), end_of_time());
    }

    #[test]
    fn counts_match_enumeration() {
        let period = TimePeriod::new(at(2019, 11, 15), at(2021, 2, 1)).unwrap();
        assert_eq!(period.month_count(), period.year_months().len());
        assert_eq!(period.day_count(), period.dates().len());
        let empty = TimePeriod::new(at(2020, 1, 1), at(2020, 1, 1)).unwrap();
        assert_eq!((empty.month_count(), empty.day_count()), (0, 0));
    }

    #[test]
    fn month_names() {
        assert_eq!(YearMonth::new(2020, 1).unwrap().month_name(), "January");
        assert_eq!(YearMonth::new(2020, 9).unwrap().month_name(), "September");
    }
}
