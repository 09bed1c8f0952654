//! Date coercion between stored values and `DateTime<Utc>`
//!
//! Reads accept every representation a date may have been stored in:
//! native BSON datetimes, BSON timestamps, strings in the model's format,
//! RFC 3339, plain `YYYY-MM-DD`, and unix seconds as numbers or numeric
//! strings. Anything else is a hydration error. Writes produce a native
//! datetime when the connection supports it and a formatted string otherwise.

use bson::Bson;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::Result;
use docbridge_common::BridgeError;

/// `YYYY-MM-DD HH:MM:SS`
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Coerce a stored value into a canonical timestamp.
pub fn as_date_time(value: &Bson, format: &str) -> Result<DateTime<Utc>> {
    match value {
        Bson::DateTime(dt) => Ok(dt.to_chrono()),
        Bson::Timestamp(ts) => from_unix_seconds(i64::from(ts.time)),
        Bson::Int32(secs) => from_unix_seconds(i64::from(*secs)),
        Bson::Int64(secs) => from_unix_seconds(*secs),
        Bson::Double(secs) => from_unix_float(*secs),
        Bson::String(s) => parse_date_str(s, format),
        other => Err(BridgeError::Hydration(format!(
            "Cannot convert {:?} value to a date",
            other.element_type()
        ))),
    }
}

/// Serialize a timestamp for storage.
pub fn from_date_time(value: DateTime<Utc>, format: &str, native: bool) -> Bson {
    if native {
        Bson::DateTime(bson::DateTime::from_chrono(value))
    } else {
        Bson::String(value.format(format).to_string())
    }
}

/// Current time at second precision, so it survives the string format.
pub fn fresh_timestamp() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

fn parse_date_str(raw: &str, format: &str) -> Result<DateTime<Utc>> {
    let s = raw.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
        return Ok(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for date_format in [format, "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, date_format) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(naive.and_utc());
            }
        }
    }
    if !s.is_empty() && s.trim_start_matches('-').chars().all(|c| c.is_ascii_digit()) {
        if let Ok(secs) = s.parse::<i64>() {
            return from_unix_seconds(secs);
        }
    }

    Err(BridgeError::Hydration(format!(
        "Cannot parse '{}' as a date with format '{}'",
        raw, format
    )))
}

fn from_unix_seconds(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| BridgeError::Hydration(format!("Unix time {} is out of range", secs)))
}

fn from_unix_float(secs: f64) -> Result<DateTime<Utc>> {
    if !secs.is_finite() {
        return Err(BridgeError::Hydration(format!("Unix time {} is not finite", secs)));
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
        .ok_or_else(|| BridgeError::Hydration(format!("Unix time {} is out of range", secs)))
}
