//! Run outcome reporting.

use crate::error::Result;
use crate::models::{RunReport, RunStatus};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Receives the terminal report of every run.
pub trait MetricsSink: Send + Sync {
    fn report(&self, report: &RunReport) -> Result<()>;
}

/// Emits one structured event per run.
#[derive(Debug, Default, Clone)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn report(&self, report: &RunReport) -> Result<()> {
        for (stream, counts) in &report.counts {
            info!(
                run_id = %report.run_id,
                stream = %stream,
                read = counts.read,
                valid = counts.valid,
                rejected = counts.rejected,
                out_of_window = counts.out_of_window,
                written = counts.written,
                rejection_fraction = counts.rejection_fraction(),
                "Stream metrics"
            );
        }

        let partitions = report.partitions.len();
        let environment = report.environment.as_deref().unwrap_or("-");
        match report.status {
            RunStatus::Succeeded => info!(
                run_id = %report.run_id,
                status = %report.status,
                partitions,
                environment,
                "Run finished"
            ),
            RunStatus::FailedValidationThreshold | RunStatus::Cancelled => warn!(
                run_id = %report.run_id,
                status = %report.status,
                partitions,
                environment,
                "Run finished"
            ),
            _ => error!(
                run_id = %report.run_id,
                status = %report.status,
                partitions,
                environment,
                errors = ?report.errors,
                "Run finished"
            ),
        }
        Ok(())
    }
}

/// Appends each report as one JSON line.
#[derive(Debug)]
pub struct JsonLinesMetricsSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesMetricsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

impl MetricsSink for JsonLinesMetricsSink {
    fn report(&self, report: &RunReport) -> Result<()> {
        let mut line = serde_json::to_vec(report)?;
        line.push(b'\n');

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// Fans a report out to several sinks. Every sink is tried; the first
/// failure is returned.
#[derive(Default)]
pub struct CompositeMetricsSink {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl CompositeMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl MetricsSink for CompositeMetricsSink {
    fn report(&self, report: &RunReport) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.report(report) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
