//! Shared utility functions

use chrono::{DateTime, SecondsFormat, Utc};

/// Parse a datetime string (RFC3339 format) or return current time
///
/// Used when mapping rows back into models. Every timestamp this crate writes
/// goes through [`format_datetime`], so the fallback only triggers on rows
/// written by something else.
pub fn parse_datetime_or_now(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse an optional datetime column
pub fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime_or_now)
}

/// Format a timestamp for storage
///
/// Fixed-width (microseconds, `Z` suffix) so that SQLite's text comparison
/// orders timestamps chronologically; expiry checks rely on it.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use warden_db::utils::format_datetime;
///
/// let dt = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
/// assert_eq!(format_datetime(dt), "2024-01-01T12:00:00.000000Z");
/// ```
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_format_datetime_orders_lexically() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let later = base + Duration::milliseconds(500);
        let much_later = base + Duration::seconds(10);

        assert!(format_datetime(base) < format_datetime(later));
        assert!(format_datetime(later) < format_datetime(much_later));
    }

    #[test]
    fn test_parse_datetime_or_now() {
        let valid_time = "2024-01-01T12:00:00Z";
        let parsed = parse_datetime_or_now(valid_time);
        assert_eq!(parsed.to_rfc3339(), "2024-01-01T12:00:00+00:00");

        // Invalid time should return current time (just check it doesn't panic)
        let invalid_time = "invalid";
        let now_before = Utc::now();
        let parsed = parse_datetime_or_now(invalid_time);
        let now_after = Utc::now();
        assert!(parsed >= now_before && parsed <= now_after);
    }

    #[test]
    fn test_round_trip_through_storage_format() {
        let dt = Utc.with_ymd_and_hms(2030, 6, 15, 8, 30, 0).unwrap();
        assert_eq!(parse_datetime_or_now(&format_datetime(dt)), dt);
        assert_eq!(parse_optional_datetime(None), None);
    }
}
