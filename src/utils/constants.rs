/// Raw zone prefixes, one per logical stream
pub const RAW_WEATHER_PREFIX: &str = "weather";
pub const RAW_SENSOR_PREFIX: &str = "iot-sensors";

/// Curated table directories
pub const CURATED_WEATHER_TABLE: &str = "weather";
pub const CURATED_SENSOR_TABLE: &str = "sensor-readings";

/// File names inside the curated zone
pub const PARTITION_FILE: &str = "part-00000.parquet";
pub const SCHEMA_MANIFEST_FILE: &str = "_schema.json";
pub const CATALOG_MANIFEST_FILE: &str = "_catalog.json";
pub const RUN_LOCK_FILE: &str = "_run.lock";

/// Directory name prefixes used while swapping partitions
pub const STAGING_PREFIX: &str = ".staging-";
pub const REPLACED_PREFIX: &str = ".replaced-";
pub const PARTITION_KEY: &str = "date";

/// Non-secret salt mixed into every pseudonymized identifier.
/// Changing it changes every curated `sensor_id_hash`.
pub const PSEUDONYM_SALT: &str = "env-telemetry-curated-v1";

/// Processing defaults
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10000;
pub const DEFAULT_LEASE_TTL_SECS: u64 = 7200;
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 300;
pub const MAX_DERIVED_DECIMALS: u32 = 10;

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
