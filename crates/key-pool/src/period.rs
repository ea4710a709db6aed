//! Calendar-month accounting periods
//!
//! Usage counters are keyed by `YYYY-MM`. Periods are derived in UTC so every
//! process sharing a store agrees on when a month rolls over.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// One calendar month, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Build a period, rejecting months outside 1..=12 and non four-digit years.
    pub fn new(year: i32, month: u32) -> Result<Self, Error> {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidPeriod(format!("month {month} out of range")));
        }
        if !(1000..=9999).contains(&year) {
            return Err(Error::InvalidPeriod(format!("year {year} is not four digits")));
        }
        Ok(Self { year, month })
    }

    /// The period containing the given instant.
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidPeriod(format!("expected YYYY-MM, got {s:?}")))?;
        if year.len() != 4 || month.len() != 2 {
            return Err(Error::InvalidPeriod(format!("expected YYYY-MM, got {s:?}")));
        }
        let year = year
            .parse()
            .map_err(|_| Error::InvalidPeriod(format!("bad year in {s:?}")))?;
        let month = month
            .parse()
            .map_err(|_| Error::InvalidPeriod(format!("bad month in {s:?}")))?;
        Period::new(year, month)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    #[test]
    fn formats_with_zero_padded_month() {
        assert_eq!(Period::new(2025, 3).unwrap().to_string(), "2025-03");
        assert_eq!(Period::new(2025, 11).unwrap().to_string(), "2025-11");
    }

    #[test]
    fn containing_uses_utc_calendar_month() {
        let at = Utc.with_ymd_and_hms(2025, 11, 30, 23, 59, 59).unwrap();
        assert_eq!(Period::containing(at).to_string(), "2025-11");

        let next = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
        assert_eq!(Period::containing(next).to_string(), "2025-12");
    }

    #[test]
    fn parses_its_own_rendering() {
        let p: Period = "2026-01".parse().unwrap();
        assert_eq!(p.year(), 2026);
        assert_eq!(p.month(), 1);
    }

    #[test]
    fn rejects_malformed_keys() {
        for bad in ["2025-13", "2025-00", "2025-1", "25-11", "2025/11", "", "abcd-ef"] {
            assert!(bad.parse::<Period>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn usable_as_json_map_key() {
        let mut usage = BTreeMap::new();
        usage.insert(Period::new(2025, 11).unwrap(), 10u32);
        let json = serde_json::to_string(&usage).unwrap();
        assert_eq!(json, r#"{"2025-11":10}"#);

        let back: BTreeMap<Period, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, usage);
    }

    #[test]
    fn orders_chronologically() {
        let a = Period::new(2025, 12).unwrap();
        let b = Period::new(2026, 1).unwrap();
        assert!(a < b);
    }
}
