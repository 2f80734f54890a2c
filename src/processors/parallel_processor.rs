use crate::error::{ProcessingError, Result};
use crate::models::{
    CuratedSensorRecord, CuratedWeatherRecord, PartitionSummary, RawSensorRecord,
    RawWeatherRecord,
};
use crate::processors::{ColumnDeriver, Pseudonymizer};
use crate::utils::RetryPolicy;
use crate::writers::{CuratedRow, CuratedZone};
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Result of one partition job. A failed job leaves the previous version of
/// its partition live.
#[derive(Debug)]
pub struct PartitionOutcome {
    pub date: NaiveDate,
    pub result: Result<PartitionSummary>,
}

/// Bounded worker pool for the CPU-bound and per-partition stages.
pub struct ParallelProcessor {
    max_workers: usize,
    pseudonymizer: Pseudonymizer,
    deriver: ColumnDeriver,
    retry: RetryPolicy,
}

impl ParallelProcessor {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            pseudonymizer: Pseudonymizer::new(),
            deriver: ColumnDeriver::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_deriver(mut self, deriver: ColumnDeriver) -> Self {
        self.deriver = deriver;
        self
    }

    /// Retry policy for partition writes
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pseudonymizer(mut self, pseudonymizer: Pseudonymizer) -> Self {
        self.pseudonymizer = pseudonymizer;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .thread_name(|i| format!("curator-worker-{}", i))
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))
    }

    /// Derive curated weather rows, grouped by partition
    pub fn curate_weather(
        &self,
        records: Vec<RawWeatherRecord>,
    ) -> Result<BTreeMap<NaiveDate, Vec<CuratedWeatherRecord>>> {
        let curated: Vec<CuratedWeatherRecord> = self.pool()?.install(|| {
            records
                .into_par_iter()
                .map(|record| self.deriver.derive_weather(record))
                .collect()
        });
        Ok(group_by_partition(curated))
    }

    /// Pseudonymize and derive curated sensor rows, grouped by partition.
    /// The raw identifier does not survive this call.
    pub fn curate_sensor(
        &self,
        records: Vec<RawSensorRecord>,
    ) -> Result<BTreeMap<NaiveDate, Vec<CuratedSensorRecord>>> {
        let curated: Vec<CuratedSensorRecord> = self.pool()?.install(|| {
            records
                .into_par_iter()
                .map(|record| {
                    let hash = self.pseudonymizer.pseudonymize(&record.sensor_id);
                    self.deriver.derive_sensor(record, hash)
                })
                .collect()
        });
        Ok(group_by_partition(curated))
    }

    /// Sort and atomically write each partition, at most `max_workers` at a
    /// time.
    ///
    /// `checkpoint` runs before each partition swap; its error becomes that
    /// partition's outcome. A partition already being written is finished.
    /// Transient write failures are retried on the worker, so no abandoned
    /// attempt outlives the call.
    pub fn write_partitions<R: CuratedRow>(
        &self,
        zone: &CuratedZone,
        partitions: BTreeMap<NaiveDate, Vec<R>>,
        checkpoint: &(dyn Fn() -> Result<()> + Sync),
    ) -> Result<Vec<PartitionOutcome>> {
        let total = partitions.len();
        let completed = AtomicUsize::new(0);
        let jobs: Vec<(NaiveDate, Vec<R>)> = partitions.into_iter().collect();

        let outcomes = self.pool()?.install(|| {
            jobs.into_par_iter()
                .map(|(date, mut rows)| {
                    let result = checkpoint().and_then(|()| {
                        rows.sort_by(R::row_order);
                        self.retry
                            .run_in_place("write", || zone.write_partition(date, &rows))
                    });

                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(
                        table = R::TABLE,
                        partition = %date,
                        done,
                        total,
                        ok = result.is_ok(),
                        "Partition job finished"
                    );
                    PartitionOutcome { date, result }
                })
                .collect::<Vec<_>>()
        });

        info!(
            table = R::TABLE,
            partitions = total,
            written = outcomes.iter().filter(|o| o.result.is_ok()).count(),
            "Partition writes finished"
        );
        Ok(outcomes)
    }
}

impl Default for ParallelProcessor {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

fn group_by_partition<R: CuratedRow>(rows: Vec<R>) -> BTreeMap<NaiveDate, Vec<R>> {
    let mut partitions: BTreeMap<NaiveDate, Vec<R>> = BTreeMap::new();
    for row in rows {
        partitions.entry(row.partition_date()).or_default().push(row);
    }
    partitions
}
