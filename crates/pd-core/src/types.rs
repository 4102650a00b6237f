use std::collections::BTreeMap;
use std::fmt;

use chrono::{Days, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DateRange
// ---------------------------------------------------------------------------

/// Errors raised when constructing a [`DateRange`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("range start {start} must be before end {end}")]
    Empty { start: NaiveDate, end: NaiveDate },
    #[error("range must cover at least one day")]
    ZeroDays,
    #[error("date arithmetic overflowed")]
    OutOfBounds,
}

/// A half-open span of calendar dates, `[start, end)`.
///
/// Immutable once built. `start < end` always holds, so every range covers at
/// least one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = RangeError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RangeError> {
        if start >= end {
            return Err(RangeError::Empty { start, end });
        }
        Ok(Self { start, end })
    }

    /// The `days` calendar days immediately before `today`: `[today - days, today)`.
    ///
    /// `today` is resolved by the caller; nothing in here reads the clock.
    pub fn trailing(today: NaiveDate, days: u32) -> Result<Self, RangeError> {
        if days == 0 {
            return Err(RangeError::ZeroDays);
        }
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .ok_or(RangeError::OutOfBounds)?;
        Self::new(start, today)
    }

    /// A range covering exactly one date.
    pub fn single(date: NaiveDate) -> Result<Self, RangeError> {
        let end = date
            .checked_add_days(Days::new(1))
            .ok_or(RangeError::OutOfBounds)?;
        Self::new(date, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn num_days(&self) -> u64 {
        self.end.signed_duration_since(self.start).num_days() as u64
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Every date in the range, ascending.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }

    /// Same start, new exclusive end.
    pub fn with_end(&self, end: NaiveDate) -> Result<Self, RangeError> {
        Self::new(self.start, end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Per-key request counts (country code or page path).
pub type CountMap = BTreeMap<String, u64>;

/// Analytics for one date exactly as the metrics source returns them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMetrics {
    pub total_requests: u64,
    #[serde(default)]
    pub unique_visitors: u64,
    #[serde(alias = "bandwidth_used")]
    pub bandwidth_bytes: u64,
    #[serde(default)]
    pub top_countries: CountMap,
    #[serde(default)]
    pub top_pages: CountMap,
}

/// The persisted snapshot for one calendar date. `date` is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub total_requests: u64,
    pub bandwidth_bytes: u64,
    pub top_countries: CountMap,
    pub top_pages: CountMap,
}

impl DailyMetrics {
    pub fn from_raw(date: NaiveDate, raw: RawMetrics) -> Self {
        Self {
            date,
            total_requests: raw.total_requests,
            bandwidth_bytes: raw.bandwidth_bytes,
            top_countries: raw.top_countries,
            top_pages: raw.top_pages,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One row of a ranked top-N list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub key: String,
    pub count: u64,
}

impl RankedEntry {
    pub fn new(key: impl Into<String>, count: u64) -> Self {
        Self {
            key: key.into(),
            count,
        }
    }
}

/// Aggregate over every stored day in `period`. Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub period: DateRange,
    pub total_requests: u64,
    pub total_bandwidth: u64,
    /// Number of daily records that were folded into this report.
    pub days_collected: u64,
    pub top_countries: Vec<RankedEntry>,
    pub top_pages: Vec<RankedEntry>,
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

// ---------------------------------------------------------------------------
// ReportSchedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Daily,
    Weekly,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Daily => "daily",
            ReportKind::Weekly => "weekly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "daily" => Some(ReportKind::Daily),
            "weekly" => Some(ReportKind::Weekly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("time_of_day must be HH:MM (24h), got {0:?}")]
    InvalidTime(String),
    #[error("unknown day_of_week {0:?}")]
    InvalidDay(String),
    #[error("weekly schedules require day_of_week")]
    MissingDay,
    #[error("daily schedules do not take a day_of_week")]
    UnexpectedDay,
    #[error("invalid recipient address {0:?}")]
    InvalidRecipient(String),
}

/// When a recurring report should be produced. Keyed by `report_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSchedule {
    pub report_type: ReportKind,
    pub enabled: bool,
    /// Lowercase full weekday name; weekly schedules only.
    pub day_of_week: Option<String>,
    /// `HH:MM`, 24h clock.
    pub time_of_day: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl ReportSchedule {
    /// Build a schedule, normalizing the weekday and checking every field.
    pub fn new(
        report_type: ReportKind,
        enabled: bool,
        day_of_week: Option<&str>,
        time_of_day: &str,
        recipients: Vec<String>,
    ) -> Result<Self, ScheduleError> {
        let day_of_week = day_of_week.map(normalize_weekday).transpose()?;
        let schedule = Self {
            report_type,
            enabled,
            day_of_week,
            time_of_day: time_of_day.to_string(),
            recipients,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.time_of_day.len() != 5
            || NaiveTime::parse_from_str(&self.time_of_day, "%H:%M").is_err()
        {
            return Err(ScheduleError::InvalidTime(self.time_of_day.clone()));
        }
        match (self.report_type, &self.day_of_week) {
            (ReportKind::Weekly, None) => return Err(ScheduleError::MissingDay),
            (ReportKind::Daily, Some(_)) => return Err(ScheduleError::UnexpectedDay),
            (ReportKind::Weekly, Some(day)) => {
                normalize_weekday(day)?;
            }
            (ReportKind::Daily, None) => {}
        }
        for r in &self.recipients {
            let valid = r
                .split_once('@')
                .is_some_and(|(user, host)| !user.is_empty() && host.contains('.'));
            if !valid {
                return Err(ScheduleError::InvalidRecipient(r.clone()));
            }
        }
        Ok(())
    }
}

fn normalize_weekday(raw: &str) -> Result<String, ScheduleError> {
    let day: Weekday = raw
        .trim()
        .parse()
        .map_err(|_| ScheduleError::InvalidDay(raw.to_string()))?;
    let name = match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    };
    Ok(name.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn empty_and_inverted_ranges_are_rejected() {
        assert!(DateRange::new(d("2024-01-02"), d("2024-01-02")).is_err());
        assert!(DateRange::new(d("2024-01-03"), d("2024-01-02")).is_err());
    }

    #[test]
    fn days_are_half_open() {
        let range = DateRange::new(d("2024-01-01"), d("2024-01-03")).unwrap();
        let days: Vec<_> = range.days().collect();
        assert_eq!(days, vec![d("2024-01-01"), d("2024-01-02")]);
        assert_eq!(range.num_days(), 2);
        assert!(range.contains(d("2024-01-02")));
        assert!(!range.contains(d("2024-01-03")));
    }

    #[test]
    fn days_cross_month_and_leap_day() {
        let range = DateRange::new(d("2024-02-28"), d("2024-03-02")).unwrap();
        let days: Vec<_> = range.days().collect();
        assert_eq!(
            days,
            vec![d("2024-02-28"), d("2024-02-29"), d("2024-03-01")]
        );
    }

    #[test]
    fn trailing_ranges_end_at_today() {
        let range = DateRange::trailing(d("2024-01-08"), 7).unwrap();
        assert_eq!(range.start(), d("2024-01-01"));
        assert_eq!(range.end(), d("2024-01-08"));
        assert_eq!(DateRange::trailing(d("2024-01-08"), 0), Err(RangeError::ZeroDays));
    }

    #[test]
    fn deserializing_an_inverted_range_fails() {
        let ok: DateRange =
            serde_json::from_str(r#"{"start":"2024-01-01","end":"2024-01-02"}"#).unwrap();
        assert_eq!(ok.num_days(), 1);
        let bad = serde_json::from_str::<DateRange>(r#"{"start":"2024-01-02","end":"2024-01-01"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn from_raw_drops_unique_visitors() {
        let raw = RawMetrics {
            total_requests: 10,
            unique_visitors: 4,
            bandwidth_bytes: 2048,
            ..Default::default()
        };
        let daily = DailyMetrics::from_raw(d("2024-01-01"), raw);
        assert_eq!(daily.total_requests, 10);
        assert_eq!(daily.bandwidth_bytes, 2048);
    }

    #[test]
    fn weekly_schedule_normalizes_day() {
        let s = ReportSchedule::new(ReportKind::Weekly, true, Some("Mon"), "08:30", vec![])
            .unwrap();
        assert_eq!(s.day_of_week.as_deref(), Some("monday"));
    }

    #[test]
    fn schedule_validation_rules() {
        assert_eq!(
            ReportSchedule::new(ReportKind::Weekly, true, None, "00:00", vec![]),
            Err(ScheduleError::MissingDay)
        );
        assert_eq!(
            ReportSchedule::new(ReportKind::Daily, true, Some("friday"), "00:00", vec![]),
            Err(ScheduleError::UnexpectedDay)
        );
        assert!(matches!(
            ReportSchedule::new(ReportKind::Daily, true, None, "24:00", vec![]),
            Err(ScheduleError::InvalidTime(_))
        ));
        assert!(matches!(
            ReportSchedule::new(ReportKind::Daily, true, None, "7:00", vec![]),
            Err(ScheduleError::InvalidTime(_))
        ));
        assert!(matches!(
            ReportSchedule::new(ReportKind::Weekly, true, Some("someday"), "07:00", vec![]),
            Err(ScheduleError::InvalidDay(_))
        ));
        assert!(matches!(
            ReportSchedule::new(
                ReportKind::Daily,
                true,
                None,
                "07:00",
                vec!["not-an-address".into()]
            ),
            Err(ScheduleError::InvalidRecipient(_))
        ));
    }

    #[test]
    fn run_state_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&RunState::Completed).unwrap(), "\"completed\"");
    }
}
