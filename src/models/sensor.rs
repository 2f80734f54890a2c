use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Top-level fields of a raw sensor event, in contract order.
pub const SENSOR_FIELDS: [&str; 7] = [
    "sensor_id",
    "city",
    "timestamp",
    "temperature_c",
    "humidity_pct",
    "aqi",
    "battery_level",
];

pub const SENSOR_RANGE_FIELDS: [&str; 4] = ["temperature_c", "humidity_pct", "aqi", "battery_level"];

/// A synthetic sensor reading. `sensor_id` is a direct identifier and must
/// never reach the curated zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RawSensorRecord {
    pub sensor_id: String,
    pub city: String,
    pub timestamp: DateTime<Utc>,

    #[validate(range(min = -50.0, max = 60.0))]
    pub temperature_c: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub humidity_pct: f64,

    #[validate(range(min = 0.0, max = 500.0))]
    pub aqi: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub battery_level: f64,
}

impl RawSensorRecord {
    pub fn event_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Categorical reading quality, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityScore {
    Fail,
    Warn,
    Pass,
}

impl QualityScore {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityScore::Fail => "FAIL",
            QualityScore::Warn => "WARN",
            QualityScore::Pass => "PASS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FAIL" => Some(QualityScore::Fail),
            "WARN" => Some(QualityScore::Warn),
            "PASS" => Some(QualityScore::Pass),
            _ => None,
        }
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the curated `sensor-readings` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedSensorRecord {
    pub sensor_id_hash: String,
    pub city: String,
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub aqi: f64,
    pub battery_level: f64,
    pub quality_score: QualityScore,
    pub date: NaiveDate,
}

impl CuratedSensorRecord {
    pub fn sort_key(&self) -> (DateTime<Utc>, &str, &str) {
        (
            self.timestamp,
            self.sensor_id_hash.as_str(),
            self.city.as_str(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_score_ordering() {
        assert!(QualityScore::Fail < QualityScore::Warn);
        assert!(QualityScore::Warn < QualityScore::Pass);
        assert_eq!(
            QualityScore::Pass.min(QualityScore::Fail),
            QualityScore::Fail
        );
    }

    #[test]
    fn test_quality_score_labels() {
        for score in [QualityScore::Fail, QualityScore::Warn, QualityScore::Pass] {
            assert_eq!(QualityScore::parse(score.as_str()), Some(score));
        }
        assert_eq!(QualityScore::parse("GOOD"), None);
        assert_eq!(QualityScore::Warn.to_string(), "WARN");
    }
}
