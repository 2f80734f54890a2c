//! Curated zone layout and atomic partition replacement.
//!
//! ```text
//! <curated_root>/<table>/_schema.json
//! <curated_root>/<table>/date=YYYY-MM-DD/part-00000.parquet
//! ```
//!
//! A partition is replaced by writing into a private staging directory in
//! the table root, moving the live partition aside and renaming staging into
//! place. Readers see either the old or the new directory. The only window
//! where neither is live is between the two renames, and [`CuratedZone::recover`]
//! repairs it on the next write.

use crate::error::{ProcessingError, Result};
use crate::models::PartitionSummary;
use crate::utils::constants::{
    PARTITION_FILE, PARTITION_KEY, REPLACED_PREFIX, SCHEMA_MANIFEST_FILE, STAGING_PREFIX,
};
use crate::utils::timestamp::{parse_partition_dir_name, partition_dir_name};
use crate::writers::schema::{CuratedRow, TableSchema};
use crate::writers::ParquetWriter;
use chrono::NaiveDate;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Repairs applied by [`CuratedZone::recover`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub restored: Vec<NaiveDate>,
    pub discarded_staging: usize,
    pub discarded_replaced: usize,
}

#[derive(Debug, Clone)]
pub struct CuratedZone {
    root: PathBuf,
    writer: ParquetWriter,
}

impl CuratedZone {
    pub fn new(root: impl Into<PathBuf>, writer: ParquetWriter) -> Self {
        Self {
            root: root.into(),
            writer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_root(&self, table: &str) -> PathBuf {
        self.root.join(table)
    }

    pub fn partition_path(&self, table: &str, date: NaiveDate) -> PathBuf {
        self.table_root(table).join(partition_dir_name(date))
    }

    /// Get a table ready for partition writes: repair interrupted swaps and
    /// check the stored schema. Nothing is written when the schema differs.
    pub fn prepare_table<R: CuratedRow>(&self) -> Result<RecoveryReport> {
        let table_root = self.table_root(R::TABLE);
        fs::create_dir_all(&table_root)?;

        let report = self.recover(R::TABLE)?;
        self.ensure_schema::<R>()?;
        Ok(report)
    }

    /// Restore partitions left without a live directory and drop leftovers
    /// of interrupted writes.
    pub fn recover(&self, table: &str) -> Result<RecoveryReport> {
        let table_root = self.table_root(table);
        let mut report = RecoveryReport::default();
        if !table_root.is_dir() {
            return Ok(report);
        }

        for entry in fs::read_dir(&table_root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            if name.starts_with(STAGING_PREFIX) {
                remove_dir_if_present(&path)?;
                report.discarded_staging += 1;
                continue;
            }

            let Some(live_name) = name.strip_prefix(REPLACED_PREFIX) else {
                continue;
            };
            let live = table_root.join(live_name);
            if live.exists() {
                remove_dir_if_present(&path)?;
                report.discarded_replaced += 1;
            } else {
                fs::rename(&path, &live)?;
                if let Some(date) = parse_partition_dir_name(live_name) {
                    report.restored.push(date);
                }
                warn!(table, partition = live_name, "Restored partition from interrupted swap");
            }
        }

        if report != RecoveryReport::default() {
            sync_dir(&table_root)?;
            info!(
                table,
                restored = report.restored.len(),
                staging = report.discarded_staging,
                replaced = report.discarded_replaced,
                "Recovered curated table"
            );
        }
        Ok(report)
    }

    /// Compare the table's `_schema.json` with `R`'s schema, writing it when
    /// the table has none yet.
    pub fn ensure_schema<R: CuratedRow>(&self) -> Result<()> {
        let expected = TableSchema::from_arrow(R::TABLE, PARTITION_KEY, &R::schema());
        let manifest = self.table_root(R::TABLE).join(SCHEMA_MANIFEST_FILE);

        match fs::read(&manifest) {
            Ok(bytes) => {
                let stored: TableSchema = serde_json::from_slice(&bytes).map_err(|e| {
                    ProcessingError::SchemaIncompatible {
                        table: R::TABLE.to_string(),
                        message: format!("unreadable {}: {}", SCHEMA_MANIFEST_FILE, e),
                    }
                })?;
                match stored.difference(&expected) {
                    None => Ok(()),
                    Some(message) => Err(ProcessingError::SchemaIncompatible {
                        table: R::TABLE.to_string(),
                        message,
                    }),
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                write_atomically(&manifest, &serde_json::to_vec_pretty(&expected)?)?;
                debug!(table = R::TABLE, "Wrote table schema manifest");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace partition `date` of `R`'s table with `rows`.
    ///
    /// `rows` must all belong to `date` and be in partition order.
    pub fn write_partition<R: CuratedRow>(
        &self,
        date: NaiveDate,
        rows: &[R],
    ) -> Result<PartitionSummary> {
        let table_root = self.table_root(R::TABLE);
        let live = self.partition_path(R::TABLE, date);
        let dir_name = partition_dir_name(date);

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&table_root)?;
        let bytes = self
            .writer
            .write_rows(rows, &staging.path().join(PARTITION_FILE))?;
        sync_dir(staging.path())?;

        let replaced = table_root.join(format!("{}{}", REPLACED_PREFIX, dir_name));
        let had_live = swap_partition(staging.path(), &live, &replaced, |from, to| {
            fs::rename(from, to)
        })?;
        sync_dir(&table_root)?;

        if had_live {
            remove_dir_if_present(&replaced)?;
        }

        debug!(
            table = R::TABLE,
            partition = %dir_name,
            rows = rows.len(),
            bytes,
            replaced = had_live,
            "Committed partition"
        );

        Ok(PartitionSummary {
            table: R::TABLE.to_string(),
            date,
            rows: rows.len(),
            path: live.join(PARTITION_FILE),
        })
    }

    /// Live partitions of a table, oldest first
    pub fn list_partitions(&self, table: &str) -> Result<Vec<NaiveDate>> {
        let table_root = self.table_root(table);
        if !table_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut dates = Vec::new();
        for entry in fs::read_dir(&table_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(date) = parse_partition_dir_name(&entry.file_name().to_string_lossy()) {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }

    pub fn writer(&self) -> &ParquetWriter {
        &self.writer
    }
}

/// Move `live` aside to `replaced` and `staging` into its place. Returns
/// whether a live partition existed.
///
/// When staging cannot be moved in, the previous partition is moved back so
/// a failed write never leaves the date without a live directory.
fn swap_partition(
    staging: &Path,
    live: &Path,
    replaced: &Path,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> Result<bool> {
    let had_live = match rename(live, replaced) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };

    if let Err(e) = rename(staging, live) {
        if had_live {
            if let Err(restore) = rename(replaced, live) {
                warn!(
                    partition = %live.display(),
                    error = %restore,
                    "Failed to restore replaced partition, left for recovery"
                );
            }
        }
        return Err(e.into());
    }
    Ok(had_live)
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write `contents` next to `path` and rename it into place
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ProcessingError::Io(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> Result<()> {
    fs::File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> Result<()> {
    Ok(())
}
