use crate::config::JobParameters;
use crate::error::{ProcessingError, Result};
use crate::models::RejectReason;
use crate::utils::constants::{
    CURATED_SENSOR_TABLE, CURATED_WEATHER_TABLE, RAW_SENSOR_PREFIX, RAW_WEATHER_PREFIX,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// The two logical raw streams and the curated table each one feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Weather,
    Sensor,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Weather, StreamKind::Sensor];

    pub fn raw_prefix(&self) -> &'static str {
        match self {
            StreamKind::Weather => RAW_WEATHER_PREFIX,
            StreamKind::Sensor => RAW_SENSOR_PREFIX,
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            StreamKind::Weather => CURATED_WEATHER_TABLE,
            StreamKind::Sensor => CURATED_SENSOR_TABLE,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Weather => f.write_str("weather"),
            StreamKind::Sensor => f.write_str("sensor"),
        }
    }
}

/// Half-open ingestion window `[start, end)` processed by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RunWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(ProcessingError::Config(format!(
                "Run window end {} must be after start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// The `hours` whole hours ending at the hour containing `now`
    pub fn trailing_hours(now: DateTime<Utc>, hours: u32) -> Result<Self> {
        let end = now
            .date_naive()
            .and_hms_opt(now.hour(), 0, 0)
            .ok_or_else(|| ProcessingError::Config(format!("Invalid run time {}", now)))?
            .and_utc();
        Self::new(end - Duration::hours(i64::from(hours.max(1))), end)
    }

    /// Every UTC calendar date the window touches
    pub fn target_partitions(&self) -> BTreeSet<NaiveDate> {
        let first = self.start.date_naive();
        let last = (self.end - Duration::microseconds(1)).date_naive();
        first
            .iter_days()
            .take_while(|d| *d <= last)
            .collect()
    }

    /// Raw ingestion range that must be read to rebuild the target partitions
    pub fn read_range(&self, lookback_days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let targets = self.target_partitions();
        let lookback = Duration::days(lookback_days.max(0));
        // A window always touches at least one date.
        let first = targets.first().copied().unwrap_or_else(|| self.start.date_naive());
        let last = targets.last().copied().unwrap_or_else(|| self.start.date_naive());
        (
            first.and_time(NaiveTime::MIN).and_utc() - lookback,
            last.and_time(NaiveTime::MIN).and_utc() + Duration::days(1) + lookback,
        )
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    FailedValidationThreshold,
    FailedIO,
    FailedSchemaIncompatible,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    /// Higher wins when several outcomes apply to one run
    fn severity(&self) -> u8 {
        match self {
            RunStatus::Pending | RunStatus::Running => 0,
            RunStatus::Succeeded => 1,
            RunStatus::FailedValidationThreshold => 2,
            RunStatus::Cancelled => 3,
            RunStatus::FailedSchemaIncompatible => 4,
            RunStatus::FailedIO => 5,
        }
    }

    pub fn worst(self, other: RunStatus) -> RunStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Status for a run aborted by `err`
    pub fn from_error(err: &ProcessingError) -> RunStatus {
        match err {
            ProcessingError::SchemaIncompatible { .. } => RunStatus::FailedSchemaIncompatible,
            ProcessingError::Cancelled => RunStatus::Cancelled,
            _ => RunStatus::FailedIO,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "Pending",
            RunStatus::Running => "Running",
            RunStatus::Succeeded => "Succeeded",
            RunStatus::FailedValidationThreshold => "FailedValidationThreshold",
            RunStatus::FailedIO => "FailedIO",
            RunStatus::FailedSchemaIncompatible => "FailedSchemaIncompatible",
            RunStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Record accounting for one stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamCounts {
    pub read: usize,
    pub valid: usize,
    pub rejected: usize,
    pub out_of_window: usize,
    pub written: usize,
    pub rejection_reasons: BTreeMap<String, usize>,
}

impl StreamCounts {
    pub fn record_rejection(&mut self, reason: &RejectReason) {
        self.rejected += 1;
        *self.rejection_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }

    /// Rejected share of the records that count against this window
    pub fn rejection_fraction(&self) -> f64 {
        let considered = self.valid + self.rejected;
        if considered == 0 {
            0.0
        } else {
            self.rejected as f64 / considered as f64
        }
    }

    pub fn merge(&mut self, other: &StreamCounts) {
        self.read += other.read;
        self.valid += other.valid;
        self.rejected += other.rejected;
        self.out_of_window += other.out_of_window;
        self.written += other.written;
        for (reason, count) in &other.rejection_reasons {
            *self.rejection_reasons.entry(reason.clone()).or_insert(0) += count;
        }
    }
}

/// One curated partition replaced by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub table: String,
    pub date: NaiveDate,
    pub rows: usize,
    pub path: PathBuf,
}

/// Run-scoped state, owned by the orchestrator for the lifetime of one run.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub window: RunWindow,
    pub target_partitions: BTreeSet<NaiveDate>,
    /// Clock used for future-timestamp checks
    pub reference_time: DateTime<Utc>,
    pub status: RunStatus,
    pub counts: BTreeMap<StreamKind, StreamCounts>,
    pub partitions: Vec<PartitionSummary>,
    pub errors: Vec<String>,
}

impl RunContext {
    pub fn new(window: RunWindow, reference_time: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            target_partitions: window.target_partitions(),
            window,
            reference_time,
            status: RunStatus::Pending,
            counts: StreamKind::ALL
                .iter()
                .map(|stream| (*stream, StreamCounts::default()))
                .collect(),
            partitions: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn counts_mut(&mut self, stream: StreamKind) -> &mut StreamCounts {
        self.counts.entry(stream).or_default()
    }

    /// Move to a terminal status, keeping the more severe of old and new
    pub fn settle(&mut self, status: RunStatus) {
        self.status = if self.status.is_terminal() {
            self.status.worst(status)
        } else {
            status
        };
    }

    pub fn fail(&mut self, err: &ProcessingError) {
        self.errors.push(err.to_string());
        self.settle(RunStatus::from_error(err));
    }

    /// Freeze the context into the report handed to monitoring
    pub fn into_report(self, params: &JobParameters, finished_at: DateTime<Utc>) -> RunReport {
        RunReport {
            run_id: self.run_id,
            window: self.window,
            status: self.status,
            counts: self.counts,
            partitions: self.partitions,
            errors: self.errors,
            environment: params.environment.clone(),
            started_at: self.reference_time,
            finished_at,
        }
    }
}

/// Terminal summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub window: RunWindow,
    pub status: RunStatus,
    pub counts: BTreeMap<StreamKind, StreamCounts>,
    pub partitions: Vec<PartitionSummary>,
    pub errors: Vec<String>,
    pub environment: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn counts(&self, stream: StreamKind) -> StreamCounts {
        self.counts.get(&stream).cloned().unwrap_or_default()
    }

    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str("=== Curation Run Report ===\n");
        summary.push_str(&format!("Run: {}\n", self.run_id));
        summary.push_str(&format!(
            "Window: {} .. {}\n",
            self.window.start.to_rfc3339(),
            self.window.end.to_rfc3339()
        ));
        summary.push_str(&format!("Status: {}\n", self.status));

        for (stream, counts) in &self.counts {
            summary.push_str(&format!(
                "\n[{}] read={} valid={} rejected={} ({:.1}%) out_of_window={} written={}\n",
                stream,
                counts.read,
                counts.valid,
                counts.rejected,
                100.0 * counts.rejection_fraction(),
                counts.out_of_window,
                counts.written
            ));
            for (reason, count) in &counts.rejection_reasons {
                summary.push_str(&format!("  - {}: {}\n", reason, count));
            }
        }

        if !self.partitions.is_empty() {
            summary.push_str("\nPartitions written:\n");
            for partition in &self.partitions {
                summary.push_str(&format!(
                    "  {} {} ({} rows)\n",
                    partition.table, partition.date, partition.rows
                ));
            }
        }

        for error in &self.errors {
            summary.push_str(&format!("\nError: {}\n", error));
        }

        summary
    }
}

/// Result of one scheduler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Completed(RunReport),
    /// Another run held the run slot; nothing was read or written.
    ConcurrentRunRejected { holder: String },
}

impl Invocation {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Invocation::Completed(report) => Some(report),
            Invocation::ConcurrentRunRejected { .. } => None,
        }
    }
}
