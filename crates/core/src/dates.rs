//! Calendar-day stamps in the device's local timezone.
//!
//! Days are plain `YYYY-MM-DD` strings throughout: they sort chronologically
//! as text, key the summary maps directly, and match the historical on-disk
//! format byte for byte.

use chrono::{Days, Local, NaiveDate};

pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Today's calendar day on this device's clock.
pub fn today_local() -> String {
    Local::now().format(DAY_FORMAT).to_string()
}

pub fn parse_day(day: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(day, DAY_FORMAT).ok()
}

pub fn format_day(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

/// The calendar day before `day`, or `None` when `day` does not parse.
pub fn previous_day(day: &str) -> Option<String> {
    let date = parse_day(day)?;
    date.checked_sub_days(Days::new(1)).map(format_day)
}

/// The local calendar day `days` before today.
pub fn days_ago_local(days: u32) -> String {
    let today = Local::now().date_naive();
    let date = today.checked_sub_days(Days::new(u64::from(days))).unwrap_or(today);
    format_day(date)
}
