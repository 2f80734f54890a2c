//! Schema validation of raw records.
//!
//! Rules run in a fixed precedence and the first failure wins:
//!
//! 1. required fields present with the expected primitive type
//! 2. timestamps parse and are not in the future beyond the clock skew
//! 3. numeric readings within their declared ranges
//! 4. weather coordinates within geographic bounds
//!
//! Within a rule, fields are visited in contract order so a record always
//! reports the same reason.

use crate::models::sensor::{SENSOR_FIELDS, SENSOR_RANGE_FIELDS};
use crate::models::weather::{WEATHER_COORDINATE_FIELDS, WEATHER_FIELDS, WEATHER_RANGE_FIELDS};
use crate::models::{
    RawSensorRecord, RawWeatherRecord, RejectReason, StreamKind, ValidationOutcome,
};
use crate::utils::parse_timestamp;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{Map, Value};
use validator::Validate;

type Fields = Map<String, Value>;
type RuleResult<T> = std::result::Result<T, RejectReason>;

#[derive(Debug, Clone)]
pub struct SchemaValidator {
    reference_time: DateTime<Utc>,
    clock_skew: Duration,
}

impl SchemaValidator {
    pub fn new(reference_time: DateTime<Utc>, clock_skew: Duration) -> Self {
        Self {
            reference_time,
            clock_skew,
        }
    }

    pub fn validate_weather(&self, fields: &Fields) -> ValidationOutcome<RawWeatherRecord> {
        match self.check_weather(fields) {
            Ok(record) => ValidationOutcome::Valid(record),
            Err(reason) => ValidationOutcome::Rejected(reason),
        }
    }

    pub fn validate_sensor(&self, fields: &Fields) -> ValidationOutcome<RawSensorRecord> {
        match self.check_sensor(fields) {
            Ok(record) => ValidationOutcome::Valid(record),
            Err(reason) => ValidationOutcome::Rejected(reason),
        }
    }

    fn check_weather(&self, fields: &Fields) -> RuleResult<RawWeatherRecord> {
        // Rule 1
        let ingestion_id = optional_str(fields, "ingestion_id")?;
        let city = required_str(fields, "city")?;
        let latitude = required_f64(fields, "latitude")?;
        let longitude = required_f64(fields, "longitude")?;
        let timestamp = required_str(fields, "timestamp")?;
        let temperature_c = required_f64(fields, "temperature_c")?;
        let humidity_pct = required_f64(fields, "humidity_pct")?;
        let windspeed_kmh = required_f64(fields, "windspeed_kmh")?;
        let precipitation_mm = required_f64(fields, "precipitation_mm")?;
        let ingested_at = optional_str(fields, "ingested_at")?;

        // Rule 2
        let timestamp = self.event_timestamp("timestamp", timestamp)?;
        let ingested_at = ingested_at
            .map(|value| {
                parse_timestamp(value)
                    .ok_or_else(|| RejectReason::InvalidTimestamp("ingested_at".to_string()))
            })
            .transpose()?;

        let record = RawWeatherRecord {
            ingestion_id: ingestion_id.map(str::to_string),
            city: city.to_string(),
            latitude,
            longitude,
            timestamp,
            temperature_c,
            humidity_pct,
            windspeed_kmh,
            precipitation_mm,
            ingested_at,
        };

        // Rules 3 and 4
        if let Err(errors) = record.validate() {
            let failed = errors.errors();
            if let Some(field) = WEATHER_RANGE_FIELDS.iter().find(|f| failed.contains_key(**f)) {
                return Err(RejectReason::OutOfRange(field.to_string()));
            }
            if let Some(field) = WEATHER_COORDINATE_FIELDS
                .iter()
                .find(|f| failed.contains_key(**f))
            {
                return Err(RejectReason::InvalidCoordinates(field.to_string()));
            }
        }

        Ok(record)
    }

    fn check_sensor(&self, fields: &Fields) -> RuleResult<RawSensorRecord> {
        let sensor_id = required_str(fields, "sensor_id")?;
        let city = required_str(fields, "city")?;
        let timestamp = required_str(fields, "timestamp")?;
        let temperature_c = required_f64(fields, "temperature_c")?;
        let humidity_pct = required_f64(fields, "humidity_pct")?;
        let aqi = required_f64(fields, "aqi")?;
        let battery_level = required_f64(fields, "battery_level")?;

        let timestamp = self.event_timestamp("timestamp", timestamp)?;

        let record = RawSensorRecord {
            sensor_id: sensor_id.to_string(),
            city: city.to_string(),
            timestamp,
            temperature_c,
            humidity_pct,
            aqi,
            battery_level,
        };

        if let Err(errors) = record.validate() {
            let failed = errors.errors();
            if let Some(field) = SENSOR_RANGE_FIELDS.iter().find(|f| failed.contains_key(**f)) {
                return Err(RejectReason::OutOfRange(field.to_string()));
            }
        }

        Ok(record)
    }

    fn event_timestamp(&self, field: &str, value: &str) -> RuleResult<DateTime<Utc>> {
        let ts = parse_timestamp(value)
            .ok_or_else(|| RejectReason::InvalidTimestamp(field.to_string()))?;
        if ts > self.reference_time + self.clock_skew {
            return Err(RejectReason::FutureTimestamp);
        }
        Ok(ts)
    }
}

fn required<'a>(fields: &'a Fields, name: &str) -> RuleResult<&'a Value> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(RejectReason::MissingField(name.to_string())),
        Some(value) => Ok(value),
    }
}

fn required_str<'a>(fields: &'a Fields, name: &str) -> RuleResult<&'a str> {
    required(fields, name)?
        .as_str()
        .ok_or_else(|| RejectReason::WrongType(name.to_string()))
}

/// Provenance fields may be absent, but not mistyped
fn optional_str<'a>(fields: &'a Fields, name: &str) -> RuleResult<Option<&'a str>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| RejectReason::WrongType(name.to_string())),
    }
}

fn required_f64(fields: &Fields, name: &str) -> RuleResult<f64> {
    required(fields, name)?
        .as_f64()
        .ok_or_else(|| RejectReason::WrongType(name.to_string()))
}

/// Top-level fields the curated schema has no column for
pub fn unknown_fields<'a>(fields: &'a Fields, known: &[&str]) -> Vec<&'a str> {
    fields
        .keys()
        .map(String::as_str)
        .filter(|key| !known.contains(key))
        .collect()
}

pub fn known_fields(stream: StreamKind) -> &'static [&'static str] {
    match stream {
        StreamKind::Weather => &WEATHER_FIELDS,
        StreamKind::Sensor => &SENSOR_FIELDS,
    }
}

/// Best-effort event date of a record, used to attribute rejections to a
/// partition. `None` when the timestamp is missing or unreadable.
pub fn event_date_hint(fields: &Fields) -> Option<NaiveDate> {
    fields
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .map(|ts| ts.date_naive())
}
