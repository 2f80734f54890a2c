use crate::config::JobParameters;
use crate::error::Result;
use crate::models::PartitionSummary;
use crate::utils::constants::{CATALOG_MANIFEST_FILE, PARTITION_KEY};
use crate::utils::timestamp::partition_dir_name;
use crate::writers::curated_zone::write_atomically;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::info;

/// Makes newly written partitions discoverable by downstream query engines.
pub trait CatalogPublisher: Send + Sync {
    fn publish(
        &self,
        table: &str,
        partitions: &[PartitionSummary],
        run_id: &str,
        params: &JobParameters,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPartition {
    pub location: String,
    pub rows: usize,
    pub last_run_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Contents of `<table>/_catalog.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCatalog {
    pub database: Option<String>,
    pub table: String,
    pub partition_key: String,
    pub partitions: BTreeMap<NaiveDate, CatalogPartition>,
}

impl TableCatalog {
    fn empty(table: &str) -> Self {
        Self {
            database: None,
            table: table.to_string(),
            partition_key: PARTITION_KEY.to_string(),
            partitions: BTreeMap::new(),
        }
    }
}

/// Catalog kept as a JSON manifest beside each curated table.
#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    curated_root: PathBuf,
}

impl ManifestCatalog {
    pub fn new(curated_root: impl Into<PathBuf>) -> Self {
        Self {
            curated_root: curated_root.into(),
        }
    }

    fn manifest_path(&self, table: &str) -> PathBuf {
        self.curated_root.join(table).join(CATALOG_MANIFEST_FILE)
    }

    pub fn load(&self, table: &str) -> Result<TableCatalog> {
        match fs::read(self.manifest_path(table)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(TableCatalog::empty(table)),
            Err(e) => Err(e.into()),
        }
    }
}

impl CatalogPublisher for ManifestCatalog {
    fn publish(
        &self,
        table: &str,
        partitions: &[PartitionSummary],
        run_id: &str,
        params: &JobParameters,
    ) -> Result<()> {
        let mut catalog = self.load(table)?;
        if params.database.is_some() {
            catalog.database = params.database.clone();
        }

        let now = Utc::now();
        for partition in partitions.iter().filter(|p| p.table == table) {
            catalog.partitions.insert(
                partition.date,
                CatalogPartition {
                    location: partition_dir_name(partition.date),
                    rows: partition.rows,
                    last_run_id: run_id.to_string(),
                    updated_at: now,
                },
            );
        }

        write_atomically(
            &self.manifest_path(table),
            &serde_json::to_vec_pretty(&catalog)?,
        )?;
        info!(
            table,
            database = catalog.database.as_deref().unwrap_or("-"),
            partitions = catalog.partitions.len(),
            "Published catalog"
        );
        Ok(())
    }
}
