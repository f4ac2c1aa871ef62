//!
//! src/dates.rs  Andrew Belles  Sept 14th, 2025
//!
//! Normalizes the mixed date formats spotify hands back
//! (release years, year-months, full dates, timestamps) into utc
//!

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Serializer;

use crate::errors::EtlError;

/// Rendering used for every date-time column in the csv output
pub const CSV_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

///
/// Accepts `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, rfc 3339 and naive date-times.
/// Naive values are taken to already be utc.
///
pub fn normalize_datetime(raw: &str) -> Result<DateTime<Utc>, EtlError> {
    let s = raw.trim();
    let unparseable = || EtlError::Parse(format!("unrecognized date {raw:?}"));

    // spotify release_date_precision = "year"
    if s.len() == 4 && is_digits(s) {
        let year: i32 = s.parse().map_err(|_| unparseable())?;
        let date = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(unparseable)?;
        return Ok(midnight(date));
    }

    // release_date_precision = "month"
    let year_month = s.len() == 7 && s.is_ascii() && s.as_bytes()[4] == b'-';
    if year_month && is_digits(&s[..4]) && is_digits(&s[5..]) {
        let date = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
            .map_err(|_| unparseable())?;
        return Ok(midnight(date));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(midnight(date));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(unparseable())
}

pub fn serialize_utc<S: Serializer>(dt: &DateTime<Utc>, serializer: S) ->
    Result<S::Ok, S::Error> {
    serializer.collect_str(&dt.format(CSV_DATETIME_FORMAT))
}
