use crate::utils::constants::PARTITION_KEY;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO-8601 timestamp.
///
/// Offsets are honoured and normalised to UTC. Timestamps without an offset
/// (the weather fetcher emits `2024-06-01T12:00`) are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Directory name for a date partition, e.g. `date=2024-06-01`
pub fn partition_dir_name(date: NaiveDate) -> String {
    format!("{}={}", PARTITION_KEY, date.format("%Y-%m-%d"))
}

/// Inverse of [`partition_dir_name`]
pub fn parse_partition_dir_name(name: &str) -> Option<NaiveDate> {
    let value = name.strip_prefix(PARTITION_KEY)?.strip_prefix('=')?;
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Microseconds since the Unix epoch, as stored in curated timestamp columns
pub fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_rfc3339_variants() {
        let zulu = parse_timestamp("2024-06-01T12:00:00Z").unwrap();
        let offset = parse_timestamp("2024-06-01T14:00:00+02:00").unwrap();
        assert_eq!(zulu, offset);

        let python = parse_timestamp("2024-06-01T12:00:00.123456+00:00").unwrap();
        assert_eq!(python.timestamp_subsec_micros(), 123456);
    }

    #[test]
    fn test_parse_naive_as_utc() {
        let ts = parse_timestamp("2024-06-01T12:00").unwrap();
        assert_eq!(ts.hour(), 12);
        assert_eq!(ts.day(), 1);

        assert!(parse_timestamp("2024-06-01T12:00:30").is_some());
    }

    #[test]
    fn test_rejects_impossible_dates() {
        assert!(parse_timestamp("2024-02-30T00:00:00Z").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_partition_dir_name_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let name = partition_dir_name(date);
        assert_eq!(name, "date=2024-06-01");
        assert_eq!(parse_partition_dir_name(&name), Some(date));
        assert_eq!(parse_partition_dir_name("city=Paris"), None);
    }
}
