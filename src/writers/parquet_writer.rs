use crate::error::{ProcessingError, Result};
use crate::utils::constants::{
    COMPRESSION_GZIP, COMPRESSION_LZ4, COMPRESSION_NONE, COMPRESSION_SNAPPY, COMPRESSION_ZSTD,
    DEFAULT_ROW_GROUP_SIZE,
};
use crate::writers::schema::CuratedRow;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::fs::File;
use std::path::Path;

/// Encodes curated rows as Parquet files.
#[derive(Debug, Clone)]
pub struct ParquetWriter {
    compression: Compression,
    row_group_size: usize,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            COMPRESSION_SNAPPY => Compression::SNAPPY,
            COMPRESSION_GZIP => Compression::GZIP(GzipLevel::default()),
            COMPRESSION_LZ4 => Compression::LZ4,
            COMPRESSION_ZSTD => Compression::ZSTD(ZstdLevel::default()),
            COMPRESSION_NONE => Compression::UNCOMPRESSED,
            _ => {
                return Err(ProcessingError::Config(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size.max(1);
        self
    }

    fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build()
    }

    /// Write `rows`, already in partition order, to `path`.
    ///
    /// The file is synced before returning so a following rename publishes
    /// complete content.
    pub fn write_rows<R: CuratedRow>(&self, rows: &[R], path: &Path) -> Result<u64> {
        let schema = R::schema();
        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file.try_clone()?, schema, Some(self.properties()))?;

        for chunk in rows.chunks(self.row_group_size) {
            let batch = R::to_batch(chunk)?;
            writer.write(&batch)?;
        }

        writer.close()?;
        file.sync_all()?;
        Ok(std::fs::metadata(path)?.len())
    }

    /// Get file statistics
    pub fn get_file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        let file_metadata = metadata.file_metadata();
        let row_groups = metadata.num_row_groups();
        let total_rows = file_metadata.num_rows();
        let file_size = std::fs::metadata(path)?.len();

        let mut row_group_sizes = Vec::new();
        let mut compression = None;
        for i in 0..row_groups {
            let rg_metadata = metadata.row_group(i);
            row_group_sizes.push(rg_metadata.num_rows());
            if compression.is_none() && rg_metadata.num_columns() > 0 {
                compression = Some(rg_metadata.column(0).compression());
            }
        }

        let columns = file_metadata
            .schema_descr()
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        Ok(ParquetFileInfo {
            total_rows,
            row_groups: row_groups as i32,
            row_group_sizes,
            file_size,
            compression: compression.unwrap_or(Compression::UNCOMPRESSED),
            columns,
        })
    }

    /// Read up to `limit` rows rendered as strings
    pub fn read_sample_rows(&self, path: &Path, limit: usize) -> Result<SampleRows> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let columns = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        let parquet_reader = builder.with_batch_size(limit.clamp(1, 8192)).build()?;

        let mut rows = Vec::new();
        for batch_result in parquet_reader {
            if rows.len() >= limit {
                break;
            }
            let batch = batch_result?;
            rows.extend(render_rows(&batch, limit - rows.len())?);
        }

        Ok(SampleRows { columns, rows })
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn render_rows(batch: &RecordBatch, limit: usize) -> Result<Vec<Vec<String>>> {
    let options = FormatOptions::default().with_null("null");
    let formatters = batch
        .columns()
        .iter()
        .map(|column| ArrayFormatter::try_new(column.as_ref(), &options))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((0..batch.num_rows().min(limit))
        .map(|row| {
            formatters
                .iter()
                .map(|f| f.value(row).to_string())
                .collect()
        })
        .collect())
}

#[derive(Debug)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: i32,
    pub row_group_sizes: Vec<i64>,
    pub file_size: u64,
    pub compression: Compression,
    pub columns: Vec<String>,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB\n\
            - Compression: {:?}\n\
            - Avg rows per group: {:.0}\n\
            - Columns: {}",
            self.total_rows,
            self.row_groups,
            self.file_size as f64 / 1_048_576.0, // Convert to MB
            self.compression,
            self.total_rows as f64 / self.row_groups.max(1) as f64,
            self.columns.join(", ")
        )
    }
}

/// String-rendered rows read back from a partition file.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SampleRows {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (index, row) in self.rows.iter().enumerate() {
            out.push_str(&format!("Row {}:\n", index + 1));
            for (column, value) in self.columns.iter().zip(row) {
                out.push_str(&format!("  {}: {}\n", column, value));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CuratedSensorRecord, QualityScore};
    use chrono::{NaiveDate, TimeZone, Utc};
    use tempfile::NamedTempFile;

    fn readings(n: u32) -> Vec<CuratedSensorRecord> {
        (0..n)
            .map(|i| CuratedSensorRecord {
                sensor_id_hash: format!("{:064x}", i),
                city: "Tokyo".to_string(),
                timestamp: Utc.with_ymd_and_hms(2024, 6, 1, i % 24, 0, 0).unwrap(),
                temperature_c: 24.5,
                humidity_pct: 70.0,
                aqi: 42.0,
                battery_level: 88.0,
                quality_score: QualityScore::Pass,
                date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            })
            .collect()
    }

    #[test]
    fn test_write_and_inspect() -> Result<()> {
        let writer = ParquetWriter::new().with_row_group_size(4);
        let temp_file = NamedTempFile::new().unwrap();

        let size = writer.write_rows(&readings(10), temp_file.path())?;
        assert!(size > 0);

        let info = writer.get_file_info(temp_file.path())?;
        assert_eq!(info.total_rows, 10);
        assert_eq!(info.row_groups, 3);
        assert_eq!(info.compression, Compression::SNAPPY);
        assert!(info.columns.contains(&"quality_score".to_string()));
        assert!(info.summary().contains("Total rows: 10"));

        Ok(())
    }

    #[test]
    fn test_different_compressions() -> Result<()> {
        let compressions = ["snappy", "gzip", "lz4", "zstd", "none"];

        for compression in &compressions {
            let writer = ParquetWriter::new().with_compression(compression)?;
            let temp_file = NamedTempFile::new().unwrap();

            let result = writer.write_rows(&readings(3), temp_file.path());
            assert!(result.is_ok(), "Failed with compression: {}", compression);
        }

        assert!(ParquetWriter::new().with_compression("brotli-9").is_err());
        Ok(())
    }

    #[test]
    fn test_identical_rows_give_identical_bytes() -> Result<()> {
        let writer = ParquetWriter::new();
        let a = NamedTempFile::new().unwrap();
        let b = NamedTempFile::new().unwrap();

        writer.write_rows(&readings(5), a.path())?;
        writer.write_rows(&readings(5), b.path())?;
        assert_eq!(std::fs::read(a.path())?, std::fs::read(b.path())?);
        Ok(())
    }

    #[test]
    fn test_read_sample_rows() -> Result<()> {
        let writer = ParquetWriter::new();
        let temp_file = NamedTempFile::new().unwrap();
        writer.write_rows(&readings(10), temp_file.path())?;

        let sample = writer.read_sample_rows(temp_file.path(), 3)?;
        assert_eq!(sample.rows.len(), 3);
        assert_eq!(sample.columns[0], "sensor_id_hash");
        let score = sample.columns.iter().position(|c| c == "quality_score").unwrap();
        assert_eq!(sample.rows[0][score], "PASS");
        assert!(sample.render().contains("city: Tokyo"));
        Ok(())
    }

    #[test]
    fn test_sample_rows_render_timestamps() -> Result<()> {
        let writer = ParquetWriter::new();
        let temp_file = NamedTempFile::new().unwrap();
        writer.write_rows(&readings(2), temp_file.path())?;

        let sample = writer.read_sample_rows(temp_file.path(), 2)?;
        let ts = sample.columns.iter().position(|c| c == "timestamp").unwrap();
        assert_eq!(sample.rows[0][ts], "2024-06-01T00:00:00+00:00");
        assert_eq!(sample.rows[1][ts], "2024-06-01T01:00:00+00:00");
        Ok(())
    }
}
