//! The format-detecting timestamp parser.
//!
//! Attempt order for strings: ISO-8601, `%Y-%m-%d %H:%M:%S[.%f]`, the
//! common slash-separated and date-only patterns, then numeric
//! reinterpretation. Numbers at or above the FILETIME epoch threshold
//! are FILETIMEs; small non-negative numbers are Unix seconds; anything
//! past the Unix ceiling is retried as milliseconds. Blobs dispatch on
//! width: 8 bytes FILETIME, 16 bytes SYSTEMTIME.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use core_types::FileTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Unix epoch expressed as a FILETIME; numeric values at or above this
/// are treated as FILETIMEs.
const MIN_FILETIME: i64 = 116_444_736_000_000_000;
/// 9999-12-31 as a FILETIME.
const MAX_FILETIME: i64 = 253_402_300_799_999_999;
/// 9999-12-31 as Unix seconds.
const MAX_UNIX_SECONDS: i64 = 253_402_300_799;

static ISO8601_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?$")
        .expect("static regex")
});

static STANDARD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?$").expect("static regex")
});

/// Detected storage format of a timestamp column or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimestampFormat {
    Iso8601,
    StandardDateTime,
    Unix,
    UnixMillis,
    FileTime,
    SystemTime,
    Mixed,
    Unknown,
}

impl TimestampFormat {
    pub fn name(self) -> &'static str {
        match self {
            TimestampFormat::Iso8601 => "ISO8601",
            TimestampFormat::StandardDateTime => "StandardDateTime",
            TimestampFormat::Unix => "Unix",
            TimestampFormat::UnixMillis => "UnixMillis",
            TimestampFormat::FileTime => "FileTime",
            TimestampFormat::SystemTime => "SystemTime",
            TimestampFormat::Mixed => "Mixed",
            TimestampFormat::Unknown => "Unknown",
        }
    }
}

/// Borrowed view of a store cell, mirroring SQLite's value kinds.
#[derive(Debug, Clone, Copy)]
pub enum SqlValue<'a> {
    Null,
    Integer(i64),
    Real(f64),
    Text(&'a str),
    Blob(&'a [u8]),
}

impl<'a> From<rusqlite::types::ValueRef<'a>> for SqlValue<'a> {
    fn from(value: rusqlite::types::ValueRef<'a>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(std::str::from_utf8(t).unwrap_or("")),
            ValueRef::Blob(b) => SqlValue::Blob(b),
        }
    }
}

/// Parse any cell value to a UTC datetime; `None` is "no time".
pub fn parse_value(value: &SqlValue<'_>) -> Option<DateTime<Utc>> {
    match value {
        SqlValue::Null => None,
        SqlValue::Text(text) => parse_string(text),
        SqlValue::Integer(i) => parse_numeric(*i as f64, Some(*i)),
        SqlValue::Real(f) => parse_numeric(*f, None),
        SqlValue::Blob(bytes) => parse_bytes(bytes),
    }
}

/// Detect which format a value is stored in, without caring whether the
/// resolved datetime is plausible.
pub fn detect_format(value: &SqlValue<'_>) -> Option<TimestampFormat> {
    match value {
        SqlValue::Null => None,
        SqlValue::Text(text) => {
            let text = text.trim();
            if ISO8601_PATTERN.is_match(text) {
                // The space-separated, offset-free form is the classic
                // SQL datetime.
                if STANDARD_PATTERN.is_match(text) {
                    return Some(TimestampFormat::StandardDateTime);
                }
                return Some(TimestampFormat::Iso8601);
            }
            if parse_common_formats(text).is_some() {
                return Some(TimestampFormat::StandardDateTime);
            }
            let numeric: f64 = text.parse().ok()?;
            detect_numeric_format(numeric, text.parse::<i64>().ok())
        }
        SqlValue::Integer(i) => detect_numeric_format(*i as f64, Some(*i)),
        SqlValue::Real(f) => detect_numeric_format(*f, None),
        SqlValue::Blob(bytes) => match bytes.len() {
            8 => Some(TimestampFormat::FileTime),
            16 => Some(TimestampFormat::SystemTime),
            _ => None,
        },
    }
}

fn detect_numeric_format(value: f64, integer: Option<i64>) -> Option<TimestampFormat> {
    if let Some(i) = integer {
        if (MIN_FILETIME..=MAX_FILETIME).contains(&i) {
            return Some(TimestampFormat::FileTime);
        }
    }
    if value >= 0.0 && value <= MAX_UNIX_SECONDS as f64 {
        return Some(TimestampFormat::Unix);
    }
    if value > MAX_UNIX_SECONDS as f64 && value / 1000.0 <= MAX_UNIX_SECONDS as f64 {
        return Some(TimestampFormat::UnixMillis);
    }
    None
}

fn parse_string(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if ISO8601_PATTERN.is_match(text) {
        if let Some(dt) = parse_iso8601(text) {
            return Some(dt);
        }
    }
    if STANDARD_PATTERN.is_match(text) {
        if let Some(dt) = parse_standard(text) {
            return Some(dt);
        }
    }
    if let Some(dt) = parse_common_formats(text) {
        return Some(dt);
    }

    // Numeric strings: Unix seconds or FILETIME rendered as text.
    if let Ok(i) = text.parse::<i64>() {
        return parse_numeric(i as f64, Some(i));
    }
    if let Ok(f) = text.parse::<f64>() {
        return parse_numeric(f, None);
    }
    None
}

fn parse_iso8601(text: &str) -> Option<DateTime<Utc>> {
    // Z normalizes to an explicit offset, space separator to T.
    let mut value = text.replace('Z', "+00:00");
    if value.contains(' ') && !value.contains('T') {
        value = value.replacen(' ', "T", 1);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
        return Some(dt.with_timezone(&Utc));
    }
    // No offset: interpret as UTC.
    NaiveDateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_standard(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_common_formats(text: &str) -> Option<DateTime<Utc>> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y/%m/%d %H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S%.f",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y"];
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }
    None
}

fn parse_numeric(value: f64, integer: Option<i64>) -> Option<DateTime<Utc>> {
    if let Some(i) = integer {
        if (MIN_FILETIME..=MAX_FILETIME).contains(&i) {
            return FileTime(i as u64).to_datetime();
        }
    }
    if value >= 0.0 && value <= MAX_UNIX_SECONDS as f64 {
        return from_unix_seconds(value);
    }
    if value > MAX_UNIX_SECONDS as f64 {
        let millis = value / 1000.0;
        if millis <= MAX_UNIX_SECONDS as f64 {
            return from_unix_seconds(millis);
        }
    }
    None
}

fn from_unix_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    let secs = seconds.floor() as i64;
    let nanos = ((seconds - seconds.floor()) * 1e9).round() as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

fn parse_bytes(bytes: &[u8]) -> Option<DateTime<Utc>> {
    match bytes.len() {
        8 => {
            let raw = u64::from_le_bytes(bytes.try_into().expect("8-byte slice"));
            FileTime(raw).to_datetime()
        }
        16 => parse_systemtime(bytes),
        _ => None,
    }
}

/// Windows SYSTEMTIME: eight little-endian u16 fields.
fn parse_systemtime(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let field = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
    let year = i32::from(field(0));
    let month = u32::from(field(1));
    // field(2) is day-of-week; ignored.
    let day = u32::from(field(3));
    let (hour, minute, second, millis) = (
        u32::from(field(4)),
        u32::from(field(5)),
        u32::from(field(6)),
        u32::from(field(7)),
    );
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()?
        .checked_add_signed(chrono::Duration::milliseconds(i64::from(millis)))
}
