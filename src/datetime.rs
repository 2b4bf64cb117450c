//! Date/time utilities for feedvault.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::{Result, VaultError};

/// Format a UTC datetime in the given timezone.
///
/// Falls back to formatting in UTC when the timezone name is unknown.
pub fn format_utc_datetime(dt: &DateTime<Utc>, timezone: &str, format: &str) -> String {
    let tz: Tz = match timezone.parse() {
        Ok(tz) => tz,
        Err(_) => return dt.format(format).to_string(),
    };
    dt.with_timezone(&tz).format(format).to_string()
}

/// Parse a caller-supplied time bound.
///
/// The string is read with `format` as a wall-clock time in `timezone`.
/// RFC 3339 strings are accepted as well since they carry their own offset.
pub fn parse_time_bound(value: &str, timezone: &str, format: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let tz: Tz = timezone
        .parse()
        .map_err(|_| VaultError::Validation(format!("unknown timezone: {timezone}")))?;

    let naive = NaiveDateTime::parse_from_str(value, format).map_err(|e| {
        VaultError::Validation(format!("invalid time {value:?} (expected {format}): {e}"))
    })?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| VaultError::Validation(format!("time {value:?} does not exist in {tz}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FMT: &str = "%Y-%m-%d %H:%M:%S";

    #[test]
    fn test_format_utc_datetime() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let result = format_utc_datetime(&dt, "Asia/Tokyo", "%Y/%m/%d %H:%M");
        assert_eq!(result, "2024/01/15 19:30"); // UTC+9
    }

    #[test]
    fn test_format_utc_datetime_invalid_timezone() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let result = format_utc_datetime(&dt, "Invalid/Zone", "%Y/%m/%d %H:%M");
        assert_eq!(result, "2024/01/15 10:30");
    }

    #[test]
    fn test_parse_time_bound_utc() {
        let dt = parse_time_bound("2020-05-24 00:00:00", "UTC", FMT).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2020, 5, 24, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_time_bound_in_timezone() {
        let dt = parse_time_bound("2020-05-24 09:00:00", "Asia/Tokyo", FMT).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2020, 5, 24, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_time_bound_rfc3339() {
        let dt = parse_time_bound("2020-05-24T08:00:00+08:00", "UTC", FMT).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2020, 5, 24, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_time_bound_malformed() {
        let err = parse_time_bound("yesterday", "UTC", FMT).unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[test]
    fn test_parse_time_bound_unknown_timezone() {
        let err = parse_time_bound("2020-05-24 00:00:00", "Nowhere/City", FMT).unwrap_err();
        assert!(err.to_string().contains("unknown timezone"));
    }
}
