//! Inclusive calendar-day date range filter.
//!
//! Bounds are UTC calendar days. A publish timestamp is accepted when its UTC
//! date lies between `start` and `end`, both ends included. A missing bound is
//! open on that side.

use crate::error::{Result, ScrapeError};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(ScrapeError::Config(format!(
                    "start date {} must not be after end date {}",
                    s, e
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Parse optional `YYYY-MM-DD` bounds as given on the command line.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        Self::new(start.map(parse_day).transpose()?, end.map(parse_day).transpose()?)
    }

    /// Accept or reject a publish timestamp. Pure; no side effects.
    pub fn accepts(&self, published: &DateTime<Utc>) -> bool {
        self.contains_day(published.date_naive())
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start.is_none_or(|s| day >= s) && self.end.is_none_or(|e| day <= e)
    }

    /// Start of the first day, 00:00:00 UTC.
    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        self.start
            .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
    }

    /// Last second of the final day, 23:59:59 UTC.
    pub fn end_instant(&self) -> Option<DateTime<Utc>> {
        self.end.and_then(|d| {
            NaiveTime::from_hms_opt(23, 59, 59).map(|t| Utc.from_utc_datetime(&d.and_time(t)))
        })
    }

    pub fn is_bounded(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "*".into());
        write!(f, "{} to {}", show(self.start), show(self.end))
    }
}

pub fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| ScrapeError::InvalidDate(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_2024() -> DateRange {
        DateRange::parse(Some("2024-01-01"), Some("2024-12-31")).unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_inclusive_on_both_ends() {
        let range = range_2024();
        assert!(range.accepts(&at("2024-01-01T00:00:00Z")));
        assert!(range.accepts(&at("2024-12-31T23:59:59Z")));
        assert!(range.accepts(&at("2024-06-15T12:00:00Z")));
    }

    #[test]
    fn test_rejects_outside() {
        let range = range_2024();
        assert!(!range.accepts(&at("2023-12-31T23:59:59Z")));
        assert!(!range.accepts(&at("2025-01-01T00:00:00Z")));
    }

    #[test]
    fn test_offsets_compare_in_utc() {
        let range = range_2024();
        // 2023-12-31 20:00 in New York is 2024-01-01 01:00 UTC.
        assert!(range.accepts(&at("2023-12-31T20:00:00-05:00")));
    }

    #[test]
    fn test_open_bounds() {
        let unbounded = DateRange::default();
        assert!(unbounded.accepts(&at("1999-01-01T00:00:00Z")));

        let from = DateRange::parse(Some("2024-01-01"), None).unwrap();
        assert!(from.accepts(&at("2030-01-01T00:00:00Z")));
        assert!(!from.accepts(&at("2023-06-01T00:00:00Z")));
        assert!(!from.is_bounded());
    }

    #[test]
    fn test_every_accepted_day_is_within_bounds() {
        let range = range_2024();
        let mut day = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        let last = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        while day <= last {
            if range.contains_day(day) {
                assert!(range.start.unwrap() <= day && day <= range.end.unwrap());
            }
            day = day.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_invalid_format() {
        assert!(matches!(parse_day("12/31/2024"), Err(ScrapeError::InvalidDate(_))));
        assert!(matches!(parse_day("2024-02-30"), Err(ScrapeError::InvalidDate(_))));
    }

    #[test]
    fn test_start_after_end_rejected() {
        assert!(DateRange::parse(Some("2024-12-31"), Some("2024-01-01")).is_err());
        assert!(DateRange::parse(Some("2024-06-01"), Some("2024-06-01")).is_ok());
    }

    #[test]
    fn test_instants_cover_whole_days() {
        let range = range_2024();
        assert_eq!(range.start_instant().unwrap().timestamp(), 1_704_067_200);
        assert_eq!(range.end_instant().unwrap(), at("2024-12-31T23:59:59Z"));
        assert_eq!(range.to_string(), "2024-01-01 to 2024-12-31");
    }
}
