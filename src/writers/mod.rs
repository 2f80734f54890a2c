pub mod catalog;
pub mod curated_zone;
pub mod parquet_writer;
pub mod schema;

pub use catalog::{CatalogPublisher, ManifestCatalog, TableCatalog};
pub use curated_zone::{CuratedZone, RecoveryReport};
pub use parquet_writer::{ParquetFileInfo, ParquetWriter, SampleRows};
pub use schema::{CuratedRow, TableSchema};
