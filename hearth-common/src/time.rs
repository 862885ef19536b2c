use crate::RFC3339_VARIANT;
use anyhow::Result;
use chrono::offset::Utc as UtcOffset;
use chrono::{DateTime, NaiveDateTime};

pub const SECOND: i64 = 1000;
pub const MINUTE: i64 = SECOND * 60;
pub const HOUR: i64 = MINUTE * 60;
pub const DAY: i64 = HOUR * 24;

pub fn from_str_to_micros(s: &str) -> Result<i64> {
    Ok(NaiveDateTime::parse_from_str(s, RFC3339_VARIANT)?
        .and_utc()
        .timestamp_micros())
}

pub fn from_str_to_utc(s: &str) -> Result<DateTime<UtcOffset>> {
    Ok(NaiveDateTime::parse_from_str(s, RFC3339_VARIANT)?.and_utc())
}

pub fn from_micros_to_str(micros: i64) -> String {
    let dt = DateTime::from_timestamp_micros(micros).unwrap_or_default();
    format!("{}", dt.format(RFC3339_VARIANT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_round_trip() {
        let s = "2024-01-01T00:00:00.000Z";
        let micros = from_str_to_micros(s).unwrap();
        assert_eq!(from_micros_to_str(micros), s);
    }

    #[test]
    fn rejects_non_rfc3339() {
        assert!(from_str_to_micros("January 1st").is_err());
    }
}
