//! One curation run from run-slot acquisition to the terminal report.
//!
//! The run is split in two phases so a raw-zone failure never leaves a
//! partially written curated zone:
//!
//! 1. list, read and validate both streams for the window
//! 2. derive, pseudonymize and atomically write every affected partition
//!
//! The run slot is held across both phases and released on every exit path.
//! Its lease is renewed between raw objects and before every partition swap;
//! a run that finds the lease taken stops writing and fails.

use crate::config::JobConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{
    CuratedSensorRecord, CuratedWeatherRecord, Invocation, RawSensorRecord, RawWeatherRecord,
    RejectReason, RunContext, RunReport, RunStatus, RunWindow, StreamCounts, StreamKind,
    ValidationOutcome,
};
use crate::monitoring::{MetricsSink, TracingMetricsSink};
use crate::processors::validator::{event_date_hint, known_fields, unknown_fields};
use crate::processors::{ColumnDeriver, ParallelProcessor, RunSlot, RunSlotGuard, SchemaValidator};
use crate::readers::{ingestion_time, LocalRawStore, RawEvent, RawReader, RawStore};
use crate::utils::{CancellationFlag, ProgressReporter};
use crate::writers::{CatalogPublisher, CuratedRow, CuratedZone, ManifestCatalog, ParquetWriter};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

/// A raw record type the validator can produce.
trait StreamRecord: Sized + Send {
    const STREAM: StreamKind;

    fn validate(validator: &SchemaValidator, fields: &Map<String, Value>)
        -> ValidationOutcome<Self>;

    fn event_date(&self) -> NaiveDate;
}

impl StreamRecord for RawWeatherRecord {
    const STREAM: StreamKind = StreamKind::Weather;

    fn validate(
        validator: &SchemaValidator,
        fields: &Map<String, Value>,
    ) -> ValidationOutcome<Self> {
        validator.validate_weather(fields)
    }

    fn event_date(&self) -> NaiveDate {
        RawWeatherRecord::event_date(self)
    }
}

impl StreamRecord for RawSensorRecord {
    const STREAM: StreamKind = StreamKind::Sensor;

    fn validate(
        validator: &SchemaValidator,
        fields: &Map<String, Value>,
    ) -> ValidationOutcome<Self> {
        validator.validate_sensor(fields)
    }

    fn event_date(&self) -> NaiveDate {
        RawSensorRecord::event_date(self)
    }
}

/// Valid records of both streams for the window's target partitions.
struct ValidatedInput {
    weather: Vec<RawWeatherRecord>,
    sensor: Vec<RawSensorRecord>,
}

pub struct JobOrchestrator {
    config: JobConfig,
    store: Arc<dyn RawStore>,
    metrics: Arc<dyn MetricsSink>,
    catalog: Arc<dyn CatalogPublisher>,
    slot: RunSlot,
    zone: CuratedZone,
    reference_time: Option<DateTime<Utc>>,
    cancel: CancellationFlag,
    progress: Option<Arc<ProgressReporter>>,
}

impl JobOrchestrator {
    /// Orchestrator over local raw and curated zones, reporting through
    /// tracing and publishing to table manifests.
    pub fn new(config: JobConfig) -> Result<Self> {
        config.check()?;
        let writer = ParquetWriter::new()
            .with_compression(&config.compression)?
            .with_row_group_size(config.row_group_size);

        Ok(Self {
            store: Arc::new(LocalRawStore::new(&config.raw_root)),
            metrics: Arc::new(TracingMetricsSink),
            catalog: Arc::new(ManifestCatalog::new(&config.curated_root)),
            slot: RunSlot::new(config.lock_path(), config.lease.ttl()),
            zone: CuratedZone::new(&config.curated_root, writer),
            reference_time: None,
            cancel: CancellationFlag::new(),
            progress: None,
            config,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn RawStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogPublisher>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Fix the clock used for future-timestamp checks
    pub fn with_reference_time(mut self, reference_time: DateTime<Utc>) -> Self {
        self.reference_time = Some(reference_time);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn run_slot(&self) -> &RunSlot {
        &self.slot
    }

    /// Execute one run over `window`.
    ///
    /// Returns `ConcurrentRunRejected` without touching either zone when
    /// another run holds the slot. Every other outcome, including failures,
    /// is a completed invocation with a terminal report.
    pub fn run(&self, window: RunWindow) -> Result<Invocation> {
        let mut ctx = RunContext::new(window, self.reference_time.unwrap_or_else(Utc::now));
        let span = info_span!("run", run_id = %ctx.run_id);
        let _enter = span.enter();

        let guard = match self.slot.acquire(&ctx.run_id) {
            Ok(guard) => Some(guard),
            Err(ProcessingError::ConcurrentRunRejected { holder }) => {
                warn!(holder = %holder, "Another run holds the run slot, skipping invocation");
                return Ok(Invocation::ConcurrentRunRejected { holder });
            }
            Err(e) => {
                ctx.fail(&e);
                None
            }
        };

        if let Some(guard) = &guard {
            ctx.status = RunStatus::Running;
            info!(
                start = %window.start,
                end = %window.end,
                partitions = ctx.target_partitions.len(),
                "Curation run started"
            );
            self.execute(&mut ctx, guard);
        }

        let report = ctx.into_report(&self.config.params, Utc::now());
        if let Err(e) = self.metrics.report(&report) {
            warn!(error = %e, "Failed to report run metrics");
        }

        if let Some(guard) = guard {
            if let Err(e) = guard.release() {
                warn!(error = %e, "Failed to release run slot");
            }
        }

        Ok(Invocation::Completed(report))
    }

    /// Phase 1 only: read and validate the window without taking the run
    /// slot or writing anything.
    pub fn validate_window(&self, window: RunWindow) -> Result<RunReport> {
        let mut ctx = RunContext::new(window, self.reference_time.unwrap_or_else(Utc::now));
        ctx.status = RunStatus::Running;

        match self.read_phase(&mut ctx, None) {
            Ok(_) => {
                self.apply_threshold(&mut ctx);
                ctx.settle(RunStatus::Succeeded);
            }
            Err(e) => ctx.fail(&e),
        }

        Ok(ctx.into_report(&self.config.params, Utc::now()))
    }

    fn execute(&self, ctx: &mut RunContext, lease: &RunSlotGuard) {
        let input = match self.read_phase(ctx, Some(lease)) {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "Read phase failed, nothing written");
                ctx.fail(&e);
                return;
            }
        };

        let breached = self.apply_threshold(ctx);
        if breached && !self.config.validation.write_on_threshold_breach {
            info!("Rejection threshold breached, skipping writes");
            return;
        }

        if let Err(e) = self.write_phase(ctx, input, lease) {
            ctx.fail(&e);
        }

        // Partitions swapped before a cancellation are live and get
        // published; after an I/O failure nothing is.
        if ctx.status == RunStatus::FailedIO {
            return;
        }
        if !ctx.partitions.is_empty() {
            if let Err(e) = self.publish(ctx) {
                ctx.fail(&e);
                return;
            }
        }

        ctx.settle(RunStatus::Succeeded);
    }

    /// Stop on cancellation, and renew the lease when one is held.
    fn checkpoint(&self, lease: Option<&RunSlotGuard>) -> Result<()> {
        self.cancel.check()?;
        lease.map_or(Ok(()), RunSlotGuard::renew)
    }

    fn read_phase(
        &self,
        ctx: &mut RunContext,
        lease: Option<&RunSlotGuard>,
    ) -> Result<ValidatedInput> {
        let reader = RawReader::new(Arc::clone(&self.store), self.config.retry.clone());
        let validator =
            SchemaValidator::new(ctx.reference_time, self.config.validation.clock_skew());

        let weather = self.read_stream::<RawWeatherRecord>(ctx, &reader, &validator, lease)?;
        let sensor = self.read_stream::<RawSensorRecord>(ctx, &reader, &validator, lease)?;
        Ok(ValidatedInput { weather, sensor })
    }

    fn read_stream<T: StreamRecord>(
        &self,
        ctx: &mut RunContext,
        reader: &RawReader,
        validator: &SchemaValidator,
        lease: Option<&RunSlotGuard>,
    ) -> Result<Vec<T>> {
        let stream = T::STREAM;
        let (read_start, read_end) = ctx
            .window
            .read_range(self.config.validation.partition_lookback_days);
        self.progress_message(&format!("Reading {} objects...", stream));

        let objects = reader.list_objects(stream, read_start, read_end)?;
        let targets = ctx.target_partitions.clone();
        let mut counts = StreamCounts::default();
        let mut records = Vec::new();

        for meta in &objects {
            self.checkpoint(lease)?;
            let object = reader.fetch(meta)?;
            let ingested_on = ingestion_time(meta).date_naive();
            let before = counts.read;

            for event in object.events() {
                counts.read += 1;
                match event {
                    RawEvent::Malformed { detail } => {
                        debug!(stream = %stream, key = %meta.key, detail = %detail, "Malformed raw content");
                        tally_rejection(&mut counts, &targets, ingested_on, &RejectReason::Malformed);
                    }
                    RawEvent::Record(fields) => {
                        self.check_schema_drift(stream, &fields)?;
                        match T::validate(validator, &fields) {
                            ValidationOutcome::Valid(record) => {
                                if targets.contains(&record.event_date()) {
                                    counts.valid += 1;
                                    records.push(record);
                                } else {
                                    counts.out_of_window += 1;
                                }
                            }
                            ValidationOutcome::Rejected(reason) => {
                                let date = event_date_hint(&fields).unwrap_or(ingested_on);
                                debug!(stream = %stream, key = %meta.key, reason = %reason, "Rejected record");
                                tally_rejection(&mut counts, &targets, date, &reason);
                            }
                        }
                    }
                }
            }

            debug!(
                stream = %stream,
                key = %meta.key,
                events = counts.read - before,
                "Read raw object"
            );
        }

        if counts.rejected > 0 {
            warn!(
                stream = %stream,
                rejected = counts.rejected,
                reasons = ?counts.rejection_reasons,
                "Records rejected"
            );
        }
        info!(
            stream = %stream,
            objects = objects.len(),
            read = counts.read,
            valid = counts.valid,
            rejected = counts.rejected,
            out_of_window = counts.out_of_window,
            "Stream validated"
        );

        ctx.counts_mut(stream).merge(&counts);
        Ok(records)
    }

    fn check_schema_drift(&self, stream: StreamKind, fields: &Map<String, Value>) -> Result<()> {
        if self.config.validation.allow_unknown_fields {
            return Ok(());
        }
        let unknown = unknown_fields(fields, known_fields(stream));
        if unknown.is_empty() {
            return Ok(());
        }
        Err(ProcessingError::SchemaIncompatible {
            table: stream.table().to_string(),
            message: format!("raw records carry unknown field(s): {}", unknown.join(", ")),
        })
    }

    /// Mark the run `FailedValidationThreshold` when any stream rejects more
    /// than the configured share. Returns whether it did.
    fn apply_threshold(&self, ctx: &mut RunContext) -> bool {
        let limit = self.config.validation.max_rejection_fraction;
        let breached: Vec<(StreamKind, f64)> = ctx
            .counts
            .iter()
            .map(|(stream, counts)| (*stream, counts.rejection_fraction()))
            .filter(|(_, fraction)| *fraction > limit)
            .collect();

        for (stream, fraction) in &breached {
            let message = format!(
                "{} rejection fraction {:.3} exceeds {:.3}",
                stream, fraction, limit
            );
            warn!(stream = %stream, fraction, limit, "Rejection threshold breached");
            ctx.errors.push(message);
        }

        if breached.is_empty() {
            false
        } else {
            ctx.settle(RunStatus::FailedValidationThreshold);
            true
        }
    }

    fn write_phase(
        &self,
        ctx: &mut RunContext,
        input: ValidatedInput,
        lease: &RunSlotGuard,
    ) -> Result<()> {
        self.checkpoint(Some(lease))?;
        self.progress_message("Writing curated partitions...");

        // Both tables are checked before either is written.
        self.zone.prepare_table::<CuratedWeatherRecord>()?;
        self.zone.prepare_table::<CuratedSensorRecord>()?;

        let deriver = ColumnDeriver::new(self.config.quality.clone());
        let processor = ParallelProcessor::new(self.config.max_workers)
            .with_deriver(deriver)
            .with_retry(self.config.retry.clone());

        let weather = processor.curate_weather(input.weather)?;
        self.write_table(ctx, &processor, StreamKind::Weather, weather, lease)?;

        let sensor = processor.curate_sensor(input.sensor)?;
        self.write_table(ctx, &processor, StreamKind::Sensor, sensor, lease)
    }

    fn write_table<R: CuratedRow>(
        &self,
        ctx: &mut RunContext,
        processor: &ParallelProcessor,
        stream: StreamKind,
        partitions: BTreeMap<NaiveDate, Vec<R>>,
        lease: &RunSlotGuard,
    ) -> Result<()> {
        if partitions.is_empty() {
            debug!(table = R::TABLE, "No valid records, table left untouched");
            return Ok(());
        }

        let checkpoint = || self.checkpoint(Some(lease));
        let outcomes = processor.write_partitions(&self.zone, partitions, &checkpoint)?;
        let mut first_error = None;
        for outcome in outcomes {
            match outcome.result {
                Ok(summary) => {
                    ctx.counts_mut(stream).written += summary.rows;
                    info!(
                        table = R::TABLE,
                        partition = %outcome.date,
                        rows = summary.rows,
                        "Partition replaced"
                    );
                    ctx.partitions.push(summary);
                }
                Err(e) => {
                    warn!(table = R::TABLE, partition = %outcome.date, error = %e, "Partition not written");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn publish(&self, ctx: &RunContext) -> Result<()> {
        let tables: BTreeSet<&str> = ctx.partitions.iter().map(|p| p.table.as_str()).collect();
        for table in tables {
            self.catalog
                .publish(table, &ctx.partitions, &ctx.run_id, &self.config.params)?;
        }
        Ok(())
    }

    fn progress_message(&self, message: &str) {
        if let Some(progress) = &self.progress {
            progress.set_message(message);
        }
    }
}

/// Count a rejection against the window when its date is a target
/// partition, otherwise as out of window.
fn tally_rejection(
    counts: &mut StreamCounts,
    targets: &BTreeSet<NaiveDate>,
    date: NaiveDate,
    reason: &RejectReason,
) {
    if targets.contains(&date) {
        counts.record_rejection(reason);
    } else {
        counts.out_of_window += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    struct Zones {
        _dir: TempDir,
        config: JobConfig,
    }

    fn zones() -> Zones {
        let dir = TempDir::new().unwrap();
        let config = JobConfig {
            raw_root: dir.path().join("raw"),
            curated_root: dir.path().join("curated"),
            max_workers: 2,
            ..JobConfig::default()
        };
        fs::create_dir_all(&config.raw_root).unwrap();
        Zones { _dir: dir, config }
    }

    fn put(config: &JobConfig, key: &str, content: &str) {
        let path = config.raw_root.join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn window() -> RunWindow {
        RunWindow::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn sensor_line(id: &str, battery: f64) -> String {
        format!(
            r#"{{"sensor_id":"{}","city":"Tokyo","timestamp":"2024-06-01T09:00:00Z","temperature_c":24.5,"humidity_pct":70,"aqi":42,"battery_level":{}}}"#,
            id, battery
        )
    }

    #[test]
    fn test_rejections_on_other_days_are_out_of_window() -> Result<()> {
        let zones = zones();
        let stale = r#"{"sensor_id":"s","city":"Tokyo","timestamp":"2024-05-31T23:00:00Z","temperature_c":24.5,"humidity_pct":170,"aqi":42,"battery_level":50}"#;
        put(
            &zones.config,
            "iot-sensors/2024/06/01/09/batch",
            &format!("{}\n{}\n", sensor_line("a", 80.0), stale),
        );

        let report = JobOrchestrator::new(zones.config.clone())?
            .with_reference_time(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap())
            .validate_window(window())?;

        let counts = report.counts(StreamKind::Sensor);
        assert_eq!(counts.read, 2);
        assert_eq!(counts.valid, 1);
        assert_eq!(counts.rejected, 0);
        assert_eq!(counts.out_of_window, 1);
        assert_eq!(report.status, RunStatus::Succeeded);
        assert!(!zones.config.curated_root.exists());
        Ok(())
    }

    #[test]
    fn test_missing_raw_zone_fails_io_and_releases_slot() -> Result<()> {
        let zones = zones();
        fs::remove_dir_all(&zones.config.raw_root)?;

        let orchestrator = JobOrchestrator::new(zones.config.clone())?;
        let invocation = orchestrator.run(window())?;

        let report = invocation.report().unwrap();
        assert_eq!(report.status, RunStatus::FailedIO);
        assert!(report.partitions.is_empty());
        assert!(!orchestrator.run_slot().path().exists());
        Ok(())
    }

    #[test]
    fn test_threshold_breach_without_write() -> Result<()> {
        let mut zones = zones();
        zones.config.validation.write_on_threshold_breach = false;
        put(
            &zones.config,
            "iot-sensors/2024/06/01/09/batch",
            &format!("{}\n{{\"broken\": \n", sensor_line("a", 80.0)),
        );

        let invocation = JobOrchestrator::new(zones.config.clone())?
            .with_reference_time(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap())
            .run(window())?;

        let report = invocation.report().unwrap();
        assert_eq!(report.status, RunStatus::FailedValidationThreshold);
        assert!(report.partitions.is_empty());
        assert!(!zones.config.curated_root.join("sensor-readings").exists());
        Ok(())
    }

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
    }

    /// Overwrite the lease file as another run would after a takeover.
    fn hand_lease_to_other_run(orchestrator: &JobOrchestrator) {
        let now = Utc::now();
        let other = crate::processors::LeaseInfo {
            holder_id: "other-holder".to_string(),
            run_id: "other-run".to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::hours(1),
        };
        fs::write(
            orchestrator.run_slot().path(),
            serde_json::to_vec(&other).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_lost_lease_stops_partition_swaps() -> Result<()> {
        let zones = zones();
        put(
            &zones.config,
            "iot-sensors/2024/06/01/09/batch",
            &format!("{}\n", sensor_line("a", 80.0)),
        );
        let orchestrator =
            JobOrchestrator::new(zones.config.clone())?.with_reference_time(reference());
        let mut ctx = RunContext::new(window(), reference());
        let guard = orchestrator.run_slot().acquire(&ctx.run_id)?;
        let input = orchestrator.read_phase(&mut ctx, Some(&guard))?;

        orchestrator.zone.prepare_table::<CuratedSensorRecord>()?;
        let processor = ParallelProcessor::new(1);
        let partitions = processor.curate_sensor(input.sensor)?;
        hand_lease_to_other_run(&orchestrator);

        let err = orchestrator
            .write_table(&mut ctx, &processor, StreamKind::Sensor, partitions, &guard)
            .unwrap_err();
        match &err {
            ProcessingError::LeaseLost { holder } => assert_eq!(holder, "other-holder"),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(RunStatus::from_error(&err), RunStatus::FailedIO);
        assert!(ctx.partitions.is_empty());
        assert!(orchestrator
            .zone
            .list_partitions(CuratedSensorRecord::TABLE)?
            .is_empty());
        Ok(())
    }

    #[test]
    fn test_lost_lease_fails_run_and_keeps_new_holder() -> Result<()> {
        let zones = zones();
        put(
            &zones.config,
            "iot-sensors/2024/06/01/09/batch",
            &format!("{}\n", sensor_line("a", 80.0)),
        );
        let orchestrator =
            JobOrchestrator::new(zones.config.clone())?.with_reference_time(reference());
        let mut ctx = RunContext::new(window(), reference());
        let guard = orchestrator.run_slot().acquire(&ctx.run_id)?;
        hand_lease_to_other_run(&orchestrator);

        orchestrator.execute(&mut ctx, &guard);
        assert_eq!(ctx.status, RunStatus::FailedIO);
        assert!(ctx.partitions.is_empty());

        guard.release()?;
        let holder = orchestrator.run_slot().current()?.unwrap();
        assert_eq!(holder.holder_id, "other-holder");
        Ok(())
    }
}
