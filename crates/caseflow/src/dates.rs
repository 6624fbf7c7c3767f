//! Lenient date parsing for hand-typed and spreadsheet dates.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Formats tried, in order, when no configuration overrides them.
///
/// Day-first forms come before any month-first reading because the case
/// registries these files come from write dates day-first.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%Y/%m/%d",
    "%d/%m/%y",
];

/// Years outside this window are treated as a format mismatch.
const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2200;

fn excel_serial() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4,6}(\.\d+)?$").expect("valid regex"))
}

/// Parses `raw` with the given chrono formats, then RFC 3339, then Excel
/// serial day numbers. Date-only formats resolve to midnight UTC.
pub fn parse_date<S: AsRef<str>>(raw: &str, formats: &[S]) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for format in formats {
        let format = format.as_ref();
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            if plausible(dt.date()) {
                return Some(dt.and_utc());
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            if plausible(date) {
                return Some(date.and_time(NaiveTime::MIN).and_utc());
            }
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    if excel_serial().is_match(raw) {
        return from_excel_serial(raw.parse().ok()?);
    }

    None
}

/// Converts an Excel serial day number (1900 date system) to UTC.
pub fn from_excel_serial(serial: f64) -> Option<DateTime<Utc>> {
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_time(NaiveTime::MIN);
    let millis = (serial * 86_400_000.0).round() as i64;
    let dt = epoch.checked_add_signed(Duration::milliseconds(millis))?;
    plausible(dt.date()).then(|| dt.and_utc())
}

fn plausible(date: NaiveDate) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&date.year())
}
