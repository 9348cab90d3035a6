use crate::errors::{AppError, AppResult};
use chrono::{Datelike, Duration, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
const MONTH_FOLDER_PREFIX: &str = "data_";

static MONTH_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})$").expect("valid month key regex"));
static MONTH_FOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data_(\d{4})-(\d{2})$").expect("valid month folder regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> AppResult<Self> {
        if !(1..=9999).contains(&year) {
            return Err(AppError::InvalidInput(format!("year out of range: {}", year)));
        }
        if !(1..=12).contains(&month) {
            return Err(AppError::InvalidInput(format!("month out of range: {}", month)));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn current() -> Self {
        Self::of(today())
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("month key holds a valid date")
    }

    pub fn last_day(self) -> NaiveDate {
        self.next()
            .first_day()
            .pred_opt()
            .expect("month key holds a valid date")
    }

    pub fn days_in_month(self) -> u32 {
        self.last_day().day()
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    pub fn display_name(self) -> String {
        self.first_day().format("%B %Y").to_string()
    }

    pub fn folder_name(self) -> String {
        format!("{}{}", MONTH_FOLDER_PREFIX, self)
    }

    pub fn from_folder_name(name: &str) -> Option<Self> {
        let caps = MONTH_FOLDER_RE.captures(name)?;
        let year = caps.get(1)?.as_str().parse().ok()?;
        let month = caps.get(2)?.as_str().parse().ok()?;
        Self::new(year, month).ok()
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some(caps) = MONTH_KEY_RE.captures(value.trim()) else {
            return Err(AppError::InvalidInput(format!("not a YYYY-MM month key: {}", value)));
        };
        let year = caps[1]
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("bad year in {}", value)))?;
        let month = caps[2]
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("bad month in {}", value)))?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for MonthKey {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonthKey> for String {
    fn from(value: MonthKey) -> Self {
        value.to_string()
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        parse_date(value).expect("valid date")
    }

    #[test]
    fn month_key_parses_and_displays() {
        let key: MonthKey = "2025-11".parse().expect("month key");
        assert_eq!(key.year(), 2025);
        assert_eq!(key.month(), 11);
        assert_eq!(key.to_string(), "2025-11");
        assert_eq!(key.display_name(), "November 2025");
        assert!("2025-13".parse::<MonthKey>().is_err());
        assert!("2025-1".parse::<MonthKey>().is_err());
    }

    #[test]
    fn navigation_wraps_years() {
        let january = MonthKey::new(2025, 1).expect("month key");
        assert_eq!(january.previous().to_string(), "2024-12");
        assert_eq!(january.previous().next(), january);
        let december = MonthKey::new(2025, 12).expect("month key");
        assert_eq!(december.next().to_string(), "2026-01");
    }

    #[test]
    fn month_bounds_follow_calendar() {
        let february = MonthKey::new(2024, 2).expect("month key");
        assert_eq!(february.last_day(), date("2024-02-29"));
        assert_eq!(MonthKey::new(2025, 2).expect("month key").days_in_month(), 28);
        assert!(february.contains(date("2024-02-10")));
        assert!(!february.contains(date("2024-03-01")));
    }

    #[test]
    fn folder_names_round_trip() {
        let key = MonthKey::new(2025, 10).expect("month key");
        assert_eq!(key.folder_name(), "data_2025-10");
        assert_eq!(MonthKey::from_folder_name("data_2025-10"), Some(key));
        assert_eq!(MonthKey::from_folder_name("data_2025-00"), None);
        assert_eq!(MonthKey::from_folder_name("backup_2025-10"), None);
    }

    #[test]
    fn serde_uses_string_form() {
        let key = MonthKey::new(2025, 3).expect("month key");
        let json = serde_json::to_string(&key).expect("serialize");
        assert_eq!(json, "\"2025-03\"");
        let back: MonthKey = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, key);
    }

    #[test]
    fn week_starts_on_monday() {
        // 2025-11-05 is a Wednesday
        assert_eq!(week_start(date("2025-11-05")), date("2025-11-03"));
        assert_eq!(week_start(date("2025-11-03")), date("2025-11-03"));
    }
}
