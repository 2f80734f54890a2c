use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Top-level fields of a raw weather object, in contract order.
pub const WEATHER_FIELDS: [&str; 10] = [
    "ingestion_id",
    "city",
    "latitude",
    "longitude",
    "timestamp",
    "temperature_c",
    "humidity_pct",
    "windspeed_kmh",
    "precipitation_mm",
    "ingested_at",
];

/// Value-range fields checked before coordinates.
pub const WEATHER_RANGE_FIELDS: [&str; 4] = [
    "temperature_c",
    "humidity_pct",
    "windspeed_kmh",
    "precipitation_mm",
];

pub const WEATHER_COORDINATE_FIELDS: [&str; 2] = ["latitude", "longitude"];

/// One hourly weather observation as written by the fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RawWeatherRecord {
    /// Fetch batch the observation arrived in
    pub ingestion_id: Option<String>,
    pub city: String,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    pub timestamp: DateTime<Utc>,

    #[validate(range(min = -90.0, max = 60.0))]
    pub temperature_c: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub humidity_pct: f64,

    #[validate(range(min = 0.0))]
    pub windspeed_kmh: f64,

    #[validate(range(min = 0.0))]
    pub precipitation_mm: f64,

    pub ingested_at: Option<DateTime<Utc>>,
}

impl RawWeatherRecord {
    /// Calendar date (UTC) of the observation
    pub fn event_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Weather row of the curated `weather` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedWeatherRecord {
    pub ingestion_id: Option<String>,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
    pub temperature_f: f64,
    pub humidity_pct: f64,
    pub windspeed_kmh: f64,
    pub precipitation_mm: f64,
    pub ingested_at: Option<DateTime<Utc>>,
    pub date: NaiveDate,
}

impl CuratedWeatherRecord {
    /// Total order used to lay rows out inside a partition
    pub fn sort_key(&self) -> (DateTime<Utc>, &str, Option<&str>, Option<DateTime<Utc>>) {
        (
            self.timestamp,
            self.city.as_str(),
            self.ingestion_id.as_deref(),
            self.ingested_at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn paris() -> RawWeatherRecord {
        RawWeatherRecord {
            ingestion_id: Some("abc123".to_string()),
            city: "Paris".to_string(),
            latitude: 48.8566,
            longitude: 2.3522,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 23, 30, 0).unwrap(),
            temperature_c: 18.0,
            humidity_pct: 60.0,
            windspeed_kmh: 10.0,
            precipitation_mm: 0.0,
            ingested_at: Some(Utc.with_ymd_and_hms(2024, 6, 2, 0, 5, 0).unwrap()),
        }
    }

    #[test]
    fn test_event_date_uses_observation_time() {
        let record = paris();
        assert_eq!(
            record.event_date(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );
    }

    #[test]
    fn test_range_attributes() {
        assert!(paris().validate().is_ok());

        let mut record = paris();
        record.latitude = 90.0;
        assert!(record.validate().is_ok());
        record.latitude = 90.0001;
        assert!(record.validate().is_err());

        let mut record = paris();
        record.windspeed_kmh = -0.1;
        let errors = record.validate().unwrap_err();
        assert!(errors.errors().contains_key("windspeed_kmh"));
    }
}
