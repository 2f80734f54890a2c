use crate::config::QualityPolicy;
use crate::models::{
    CuratedSensorRecord, CuratedWeatherRecord, QualityScore, RawSensorRecord, RawWeatherRecord,
};
use crate::utils::constants::MAX_DERIVED_DECIMALS;

/// Celsius to Fahrenheit, rounded to the decimal precision the exact
/// conversion of the reading needs.
///
/// `×9/5` adds at most one decimal digit to a decimal reading, so rounding
/// to one digit beyond the reading's own precision returns the exact value
/// (`18.0 → 64.4`, `18.25 → 64.85`) and reruns always agree.
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    let fahrenheit = celsius * 9.0 / 5.0 + 32.0;
    let decimals = (decimal_places(celsius) + 1).min(MAX_DERIVED_DECIMALS);
    round_to(fahrenheit, decimals)
}

/// Digits after the decimal point in the shortest representation of `value`
fn decimal_places(value: f64) -> u32 {
    let repr = value.to_string();
    match repr.split_once('.') {
        Some((_, fraction)) if !repr.contains('e') => fraction.len() as u32,
        _ => 0,
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Map battery level and air quality to a categorical score.
///
/// Each reading is graded on its own against the policy table and the worse
/// grade wins.
pub fn quality_score(policy: &QualityPolicy, battery_level: f64, aqi: f64) -> QualityScore {
    let battery = if battery_level >= policy.battery_pass_min {
        QualityScore::Pass
    } else if battery_level >= policy.battery_warn_min {
        QualityScore::Warn
    } else {
        QualityScore::Fail
    };

    let air = if aqi > policy.aqi_fail_above {
        QualityScore::Fail
    } else if aqi > policy.aqi_warn_above {
        QualityScore::Warn
    } else {
        QualityScore::Pass
    };

    battery.min(air)
}

/// Pure derivation of curated columns from validated records.
#[derive(Debug, Clone, Default)]
pub struct ColumnDeriver {
    policy: QualityPolicy,
}

impl ColumnDeriver {
    pub fn new(policy: QualityPolicy) -> Self {
        Self { policy }
    }

    pub fn derive_weather(&self, record: RawWeatherRecord) -> CuratedWeatherRecord {
        let date = record.event_date();
        CuratedWeatherRecord {
            temperature_f: celsius_to_fahrenheit(record.temperature_c),
            ingestion_id: record.ingestion_id,
            city: record.city,
            latitude: record.latitude,
            longitude: record.longitude,
            timestamp: record.timestamp,
            temperature_c: record.temperature_c,
            humidity_pct: record.humidity_pct,
            windspeed_kmh: record.windspeed_kmh,
            precipitation_mm: record.precipitation_mm,
            ingested_at: record.ingested_at,
            date,
        }
    }

    /// Takes the pseudonym instead of the raw identifier, which is dropped
    /// with the consumed record.
    pub fn derive_sensor(&self, record: RawSensorRecord, sensor_id_hash: String) -> CuratedSensorRecord {
        CuratedSensorRecord {
            quality_score: quality_score(&self.policy, record.battery_level, record.aqi),
            date: record.event_date(),
            sensor_id_hash,
            city: record.city,
            timestamp: record.timestamp,
            temperature_c: record.temperature_c,
            humidity_pct: record.humidity_pct,
            aqi: record.aqi,
            battery_level: record.battery_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn test_fahrenheit_scenario() {
        assert_eq!(celsius_to_fahrenheit(18.0), 64.4);
        assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
        assert_eq!(celsius_to_fahrenheit(-40.0), -40.0);
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
    }

    #[test]
    fn test_fahrenheit_matches_formula() {
        for tenths in -900..=600 {
            let celsius = tenths as f64 / 10.0;
            let expected = celsius * 9.0 / 5.0 + 32.0;
            let derived = celsius_to_fahrenheit(celsius);
            assert!(
                (derived - expected).abs() < 1e-9,
                "{} -> {} (expected {})",
                celsius,
                derived,
                expected
            );
        }
        assert_eq!(celsius_to_fahrenheit(18.25), 64.85);
    }

    #[test]
    fn test_decimal_places() {
        assert_eq!(decimal_places(18.0), 0);
        assert_eq!(decimal_places(18.3), 1);
        assert_eq!(decimal_places(-0.25), 2);
    }

    #[test]
    fn test_quality_score_policy_table() {
        let policy = QualityPolicy::default();
        assert_eq!(quality_score(&policy, 88.0, 42.0), QualityScore::Pass);
        assert_eq!(quality_score(&policy, 50.0, 100.0), QualityScore::Pass);
        assert_eq!(quality_score(&policy, 49.9, 42.0), QualityScore::Warn);
        assert_eq!(quality_score(&policy, 88.0, 120.0), QualityScore::Warn);
        assert_eq!(quality_score(&policy, 19.9, 42.0), QualityScore::Fail);
        assert_eq!(quality_score(&policy, 88.0, 151.0), QualityScore::Fail);
        assert_eq!(quality_score(&policy, 5.0, 180.0), QualityScore::Fail);
    }

    #[test]
    fn test_quality_score_follows_policy() {
        let strict = QualityPolicy {
            battery_pass_min: 90.0,
            ..QualityPolicy::default()
        };
        assert_eq!(quality_score(&strict, 88.0, 42.0), QualityScore::Warn);
    }

    #[test]
    fn test_derive_weather() {
        let raw = RawWeatherRecord {
            ingestion_id: None,
            city: "Paris".to_string(),
            latitude: 48.8566,
            longitude: 2.3522,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            temperature_c: 18.0,
            humidity_pct: 60.0,
            windspeed_kmh: 10.0,
            precipitation_mm: 0.0,
            ingested_at: None,
        };

        let deriver = ColumnDeriver::default();
        let curated = deriver.derive_weather(raw.clone());
        assert_eq!(curated.temperature_f, 64.4);
        assert_eq!(curated.date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(curated.city, raw.city);
        assert_eq!(deriver.derive_weather(raw), curated);
    }

    #[test]
    fn test_derive_sensor() {
        let raw = RawSensorRecord {
            sensor_id: "sensor-42".to_string(),
            city: "Tokyo".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
            temperature_c: 24.5,
            humidity_pct: 70.0,
            aqi: 180.0,
            battery_level: 5.0,
        };

        let curated = ColumnDeriver::default().derive_sensor(raw, "ab".repeat(32));
        assert_eq!(curated.quality_score, QualityScore::Fail);
        assert_eq!(curated.sensor_id_hash.len(), 64);
        assert_eq!(curated.date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    }
}
