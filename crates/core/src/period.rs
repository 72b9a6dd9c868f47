use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("Invalid billing cycle '{0}': expected YYYY-MM")]
    InvalidFormat(String),
}

/// A credit-card billing cycle: one calendar month, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingCycle {
    year: i32,
    month: u32,
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingCycle {
    type Err = CycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CycleError::InvalidFormat(s.to_string());
        let bytes = s.as_bytes();
        if bytes.len() != 7 || bytes[4] != b'-' {
            return Err(invalid());
        }
        let digits = |range: std::ops::Range<usize>| {
            let part = &s[range];
            if part.bytes().all(|b| b.is_ascii_digit()) {
                part.parse::<u32>().map_err(|_| invalid())
            } else {
                Err(invalid())
            }
        };
        let year = digits(0..4)?;
        let month = digits(5..7)?;
        BillingCycle::new(year as i32, month).ok_or_else(invalid)
    }
}

impl TryFrom<String> for BillingCycle {
    type Error = CycleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingCycle> for String {
    fn from(cycle: BillingCycle) -> Self {
        cycle.to_string()
    }
}

impl BillingCycle {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (1..=9999).contains(&year) {
            Some(BillingCycle { year, month })
        } else {
            None
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        BillingCycle {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(self) -> NaiveDate {
        self.next()
            .first_day()
            .pred_opt()
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            BillingCycle { year: self.year - 1, month: 12 }
        } else {
            BillingCycle { year: self.year, month: self.month - 1 }
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            BillingCycle { year: self.year + 1, month: 1 }
        } else {
            BillingCycle { year: self.year, month: self.month + 1 }
        }
    }

    pub fn range(self) -> DateRange {
        DateRange::new(self.first_day(), self.last_day())
    }

    /// Three months centred on the cycle: the card network settles a payment
    /// days after the bank posts it, so the bill can land in a neighbouring month.
    pub fn import_window(self) -> DateRange {
        DateRange::new(self.previous().first_day(), self.next().last_day())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn cycle(s: &str) -> BillingCycle {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(cycle("2024-11").to_string(), "2024-11");
        assert_eq!(cycle("2024-01").month(), 1);
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["2024-13", "2024-00", "2024-1", "24-11", "2024/11", "2024-11-01", "abcd-ef", ""] {
            assert!(bad.parse::<BillingCycle>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn first_and_last_day() {
        assert_eq!(cycle("2024-02").first_day(), date(2024, 2, 1));
        assert_eq!(cycle("2024-02").last_day(), date(2024, 2, 29));
        assert_eq!(cycle("2024-12").last_day(), date(2024, 12, 31));
    }

    #[test]
    fn previous_and_next_cross_year() {
        assert_eq!(cycle("2024-01").previous(), cycle("2023-12"));
        assert_eq!(cycle("2024-12").next(), cycle("2025-01"));
    }

    #[test]
    fn import_window_spans_three_months() {
        let window = cycle("2024-11").import_window();
        assert_eq!(window.start, date(2024, 10, 1));
        assert_eq!(window.end, date(2024, 12, 31));

        let window = cycle("2025-01").import_window();
        assert_eq!(window.start, date(2024, 12, 1));
        assert_eq!(window.end, date(2025, 2, 28));
    }

    #[test]
    fn of_date() {
        assert_eq!(BillingCycle::of(date(2024, 11, 30)), cycle("2024-11"));
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&cycle("2024-11")).unwrap();
        assert_eq!(json, "\"2024-11\"");
        assert!(serde_json::from_str::<BillingCycle>("\"2024-13\"").is_err());
    }

    #[test]
    fn date_range_contains_is_inclusive() {
        let range = cycle("2024-11").range();
        assert!(range.contains(date(2024, 11, 1)));
        assert!(range.contains(date(2024, 11, 30)));
        assert!(!range.contains(date(2024, 12, 1)));
    }
}
