use crate::error::Result;
use crate::models::{CuratedSensorRecord, CuratedWeatherRecord};
use crate::utils::constants::{CURATED_SENSOR_TABLE, CURATED_WEATHER_TABLE};
use crate::utils::timestamp::to_micros;
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Offset form of UTC; named zones need arrow's `chrono-tz` to be read back.
const UTC: &str = "+00:00";

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into()))
}

/// A row type of one curated table.
///
/// The partition column (`date`) is carried by the directory name and is
/// not part of the file schema.
pub trait CuratedRow: Send + Sync + Sized {
    const TABLE: &'static str;

    fn schema() -> SchemaRef;

    fn partition_date(&self) -> NaiveDate;

    /// Total order of rows inside a partition
    fn row_order(&self, other: &Self) -> Ordering;

    fn to_batch(rows: &[Self]) -> Result<RecordBatch>;
}

impl CuratedRow for CuratedWeatherRecord {
    const TABLE: &'static str = CURATED_WEATHER_TABLE;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("ingestion_id", DataType::Utf8, true),
            Field::new("city", DataType::Utf8, false),
            Field::new("latitude", DataType::Float64, false),
            Field::new("longitude", DataType::Float64, false),
            Field::new("timestamp", timestamp_type(), false),
            Field::new("temperature_c", DataType::Float64, false),
            Field::new("temperature_f", DataType::Float64, false),
            Field::new("humidity_pct", DataType::Float64, false),
            Field::new("windspeed_kmh", DataType::Float64, false),
            Field::new("precipitation_mm", DataType::Float64, false),
            Field::new("ingested_at", timestamp_type(), true),
        ]))
    }

    fn partition_date(&self) -> NaiveDate {
        self.date
    }

    fn row_order(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key()).then_with(|| {
            self.temperature_c
                .total_cmp(&other.temperature_c)
                .then(self.humidity_pct.total_cmp(&other.humidity_pct))
        })
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        let ingestion_ids: Vec<Option<&str>> =
            rows.iter().map(|r| r.ingestion_id.as_deref()).collect();
        let cities: Vec<&str> = rows.iter().map(|r| r.city.as_str()).collect();
        let latitudes: Vec<f64> = rows.iter().map(|r| r.latitude).collect();
        let longitudes: Vec<f64> = rows.iter().map(|r| r.longitude).collect();
        let timestamps: Vec<i64> = rows.iter().map(|r| to_micros(&r.timestamp)).collect();
        let temps_c: Vec<f64> = rows.iter().map(|r| r.temperature_c).collect();
        let temps_f: Vec<f64> = rows.iter().map(|r| r.temperature_f).collect();
        let humidity: Vec<f64> = rows.iter().map(|r| r.humidity_pct).collect();
        let windspeed: Vec<f64> = rows.iter().map(|r| r.windspeed_kmh).collect();
        let precipitation: Vec<f64> = rows.iter().map(|r| r.precipitation_mm).collect();
        let ingested_at: Vec<Option<i64>> = rows
            .iter()
            .map(|r| r.ingested_at.as_ref().map(to_micros))
            .collect();

        let batch = RecordBatch::try_new(
            Self::schema(),
            vec![
                Arc::new(StringArray::from(ingestion_ids)),
                Arc::new(StringArray::from(cities)),
                Arc::new(Float64Array::from(latitudes)),
                Arc::new(Float64Array::from(longitudes)),
                Arc::new(TimestampMicrosecondArray::from(timestamps).with_timezone(UTC)),
                Arc::new(Float64Array::from(temps_c)),
                Arc::new(Float64Array::from(temps_f)),
                Arc::new(Float64Array::from(humidity)),
                Arc::new(Float64Array::from(windspeed)),
                Arc::new(Float64Array::from(precipitation)),
                Arc::new(TimestampMicrosecondArray::from(ingested_at).with_timezone(UTC)),
            ],
        )?;

        Ok(batch)
    }
}

impl CuratedRow for CuratedSensorRecord {
    const TABLE: &'static str = CURATED_SENSOR_TABLE;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("sensor_id_hash", DataType::Utf8, false),
            Field::new("city", DataType::Utf8, false),
            Field::new("timestamp", timestamp_type(), false),
            Field::new("temperature_c", DataType::Float64, false),
            Field::new("humidity_pct", DataType::Float64, false),
            Field::new("aqi", DataType::Float64, false),
            Field::new("battery_level", DataType::Float64, false),
            Field::new("quality_score", DataType::Utf8, false),
        ]))
    }

    fn partition_date(&self) -> NaiveDate {
        self.date
    }

    fn row_order(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key()).then_with(|| {
            self.temperature_c
                .total_cmp(&other.temperature_c)
                .then(self.humidity_pct.total_cmp(&other.humidity_pct))
                .then(self.aqi.total_cmp(&other.aqi))
                .then(self.battery_level.total_cmp(&other.battery_level))
        })
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        let hashes: Vec<&str> = rows.iter().map(|r| r.sensor_id_hash.as_str()).collect();
        let cities: Vec<&str> = rows.iter().map(|r| r.city.as_str()).collect();
        let timestamps: Vec<i64> = rows.iter().map(|r| to_micros(&r.timestamp)).collect();
        let temps: Vec<f64> = rows.iter().map(|r| r.temperature_c).collect();
        let humidity: Vec<f64> = rows.iter().map(|r| r.humidity_pct).collect();
        let aqi: Vec<f64> = rows.iter().map(|r| r.aqi).collect();
        let battery: Vec<f64> = rows.iter().map(|r| r.battery_level).collect();
        let scores: Vec<&str> = rows.iter().map(|r| r.quality_score.as_str()).collect();

        let batch = RecordBatch::try_new(
            Self::schema(),
            vec![
                Arc::new(StringArray::from(hashes)),
                Arc::new(StringArray::from(cities)),
                Arc::new(TimestampMicrosecondArray::from(timestamps).with_timezone(UTC)),
                Arc::new(Float64Array::from(temps)),
                Arc::new(Float64Array::from(humidity)),
                Arc::new(Float64Array::from(aqi)),
                Arc::new(Float64Array::from(battery)),
                Arc::new(StringArray::from(scores)),
            ],
        )?;

        Ok(batch)
    }
}

/// Column list recorded in a table's `_schema.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub partition_key: String,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl TableSchema {
    pub fn from_arrow(table: &str, partition_key: &str, schema: &Schema) -> Self {
        Self {
            table: table.to_string(),
            partition_key: partition_key.to_string(),
            columns: schema
                .fields()
                .iter()
                .map(|field| ColumnSpec {
                    name: field.name().clone(),
                    data_type: field.data_type().to_string(),
                    nullable: field.is_nullable(),
                })
                .collect(),
        }
    }

    /// First difference to `expected`, described for an operator
    pub fn difference(&self, expected: &TableSchema) -> Option<String> {
        if self.partition_key != expected.partition_key {
            return Some(format!(
                "partition key is {}, expected {}",
                self.partition_key, expected.partition_key
            ));
        }

        for (index, column) in expected.columns.iter().enumerate() {
            match self.columns.get(index) {
                None => return Some(format!("column {} is missing", column.name)),
                Some(found) if found != column => {
                    return Some(format!(
                        "column {} is {} {}, expected {} {}",
                        index,
                        found.name,
                        found.data_type,
                        column.name,
                        column.data_type
                    ))
                }
                Some(_) => {}
            }
        }

        self.columns
            .get(expected.columns.len())
            .map(|extra| format!("unexpected column {}", extra.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QualityScore;
    use chrono::{TimeZone, Utc};

    fn reading(hash: &str, hour: u32) -> CuratedSensorRecord {
        CuratedSensorRecord {
            sensor_id_hash: hash.to_string(),
            city: "Tokyo".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
            temperature_c: 24.5,
            humidity_pct: 70.0,
            aqi: 42.0,
            battery_level: 88.0,
            quality_score: QualityScore::Pass,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        }
    }

    #[test]
    fn test_sensor_batch_has_no_raw_identifier() {
        let batch = CuratedSensorRecord::to_batch(&[reading("aa", 1), reading("bb", 2)]).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert!(batch.schema().field_with_name("sensor_id").is_err());
        assert!(batch.schema().field_with_name("date").is_err());
    }

    #[test]
    fn test_weather_nullable_provenance() {
        let row = CuratedWeatherRecord {
            ingestion_id: None,
            city: "Paris".to_string(),
            latitude: 48.8566,
            longitude: 2.3522,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            temperature_c: 18.0,
            temperature_f: 64.4,
            humidity_pct: 60.0,
            windspeed_kmh: 10.0,
            precipitation_mm: 0.0,
            ingested_at: None,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        };
        let batch = CuratedWeatherRecord::to_batch(&[row]).unwrap();
        assert_eq!(batch.column(0).null_count(), 1);
        assert_eq!(batch.column(10).null_count(), 1);
    }

    #[test]
    fn test_row_order_is_by_time_then_hash() {
        let mut rows = vec![reading("bb", 1), reading("aa", 2), reading("aa", 1)];
        rows.sort_by(CuratedSensorRecord::row_order);
        let keys: Vec<_> = rows
            .iter()
            .map(|r| (r.timestamp.format("%H").to_string(), r.sensor_id_hash.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("01".to_string(), "aa".to_string()),
                ("01".to_string(), "bb".to_string()),
                ("02".to_string(), "aa".to_string()),
            ]
        );
    }

    #[test]
    fn test_schema_difference() {
        let current = TableSchema::from_arrow("weather", "date", &CuratedWeatherRecord::schema());
        assert_eq!(current.difference(&current), None);

        let mut drifted = current.clone();
        drifted.columns.push(ColumnSpec {
            name: "uv_index".to_string(),
            data_type: "Float64".to_string(),
            nullable: true,
        });
        assert!(drifted.difference(&current).unwrap().contains("uv_index"));
        assert!(current.difference(&drifted).unwrap().contains("missing"));
    }

    #[test]
    fn test_timestamps_use_offset_timezone() {
        let manifest =
            TableSchema::from_arrow("sensor-readings", "date", &CuratedSensorRecord::schema());
        let timestamp = manifest
            .columns
            .iter()
            .find(|c| c.name == "timestamp")
            .unwrap();
        assert!(timestamp.data_type.contains("+00:00"));

        let batch = CuratedSensorRecord::to_batch(&[reading("aa", 1)]).unwrap();
        assert_eq!(batch.schema().field_with_name("timestamp").unwrap().data_type(), &timestamp_type());
    }
}
