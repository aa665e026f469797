//! Calendar-date resolution for free-form deadline text.
//!
//! Numeric dates are read month-first (`MM/DD/YYYY`). `03/04/2026` is always
//! March 4th; European day-first input is not detected.
//!
//! Keywords match as plain substrings, so `open` also fires inside words such
//! as "Copenhagen" or "reopens" and turns the whole text into `varies`.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use schol_core::{Deadline, DeadlineResult};

/// Substrings that mark a deadline as having no fixed date. Checked before any
/// date extraction.
pub const VARIES_KEYWORDS: &[&str] = &[
    "varies",
    "rolling",
    "ongoing",
    "continuous",
    "open",
    "no deadline",
    "flexible",
    "year-round",
    "anytime",
];

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

static ISO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").unwrap());
static NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4})\b").unwrap());
static MONTH_DAY_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
    ))
    .unwrap()
});
static DAY_MONTH_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTHS})\.?,?\s+(\d{{4}})\b"
    ))
    .unwrap()
});

pub fn has_varies_keyword(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    VARIES_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn num<T: std::str::FromStr>(caps: &regex::Captures<'_>, idx: usize) -> Option<T> {
    caps.get(idx)?.as_str().parse().ok()
}

/// Picks a deadline out of free text relative to a fixed "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateResolver {
    today: NaiveDate,
}

impl DateResolver {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn current() -> Self {
        Self::new(Utc::now().date_naive())
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Every real calendar date in `text` dated this year or later, ascending
    /// and without repeats.
    pub fn candidates(&self, text: &str) -> Vec<NaiveDate> {
        let lower = text.to_lowercase();
        let mut dates = Vec::new();

        for caps in ISO_RE.captures_iter(&lower) {
            if let (Some(y), Some(m), Some(d)) = (num(&caps, 1), num(&caps, 2), num(&caps, 3)) {
                dates.extend(NaiveDate::from_ymd_opt(y, m, d));
            }
        }
        for caps in NUMERIC_RE.captures_iter(&lower) {
            if let (Some(m), Some(d), Some(y)) = (num(&caps, 1), num(&caps, 2), num(&caps, 3)) {
                dates.extend(NaiveDate::from_ymd_opt(y, m, d));
            }
        }
        for caps in MONTH_DAY_YEAR_RE.captures_iter(&lower) {
            let month = caps.get(1).and_then(|m| month_number(m.as_str()));
            if let (Some(m), Some(d), Some(y)) = (month, num(&caps, 2), num(&caps, 3)) {
                dates.extend(NaiveDate::from_ymd_opt(y, m, d));
            }
        }
        for caps in DAY_MONTH_YEAR_RE.captures_iter(&lower) {
            let month = caps.get(2).and_then(|m| month_number(m.as_str()));
            if let (Some(d), Some(m), Some(y)) = (num(&caps, 1), month, num(&caps, 3)) {
                dates.extend(NaiveDate::from_ymd_opt(y, m, d));
            }
        }

        dates.retain(|d| d.year() >= self.today.year());
        dates.sort();
        dates.dedup();
        dates
    }

    /// Closest upcoming date, else the latest date found, else `Varies`.
    pub fn resolve(&self, text: &str) -> Deadline {
        if has_varies_keyword(text) {
            return Deadline::Varies;
        }
        let dates = self.candidates(text);
        if let Some(upcoming) = dates.iter().find(|d| **d >= self.today) {
            return Deadline::Date(*upcoming);
        }
        dates.last().copied().map_or(Deadline::Varies, Deadline::Date)
    }

    pub fn parse_deadline(&self, text: &str) -> DeadlineResult {
        DeadlineResult {
            deadline: self.resolve(text),
        }
    }
}
