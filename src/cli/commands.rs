use crate::cli::args::{Cli, Commands, JobArgs};
use crate::config::JobConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{Invocation, RunReport, RunStatus, RunWindow};
use crate::monitoring::{CompositeMetricsSink, JsonLinesMetricsSink, TracingMetricsSink};
use crate::processors::JobOrchestrator;
use crate::utils::constants::PARTITION_FILE;
use crate::utils::{parse_timestamp, CancellationFlag, ProgressReporter};
use crate::writers::ParquetWriter;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Process exit codes
pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_THRESHOLD: i32 = 2;

pub async fn run(cli: Cli) -> Result<i32> {
    let quiet = cli.quiet;

    match cli.command {
        Commands::Run {
            job,
            metrics_file,
            timeout_secs,
        } => run_job(job, metrics_file, timeout_secs, quiet).await,

        Commands::Validate { job } => validate(job, quiet).await,

        Commands::Info { partition, sample } => {
            show_partition_info(&partition, sample)?;
            Ok(EXIT_OK)
        }
    }
}

async fn run_job(
    job: JobArgs,
    metrics_file: Option<PathBuf>,
    timeout_secs: Option<u64>,
    quiet: bool,
) -> Result<i32> {
    let config = load_config(&job)?;
    let window = resolve_window(&job, Utc::now())?;

    if !quiet {
        println!("Curating telemetry...");
        println!("Raw zone: {}", config.raw_root.display());
        println!("Curated zone: {}", config.curated_root.display());
        println!(
            "Window: {} .. {}",
            window.start.to_rfc3339(),
            window.end.to_rfc3339()
        );
    }

    let mut metrics = CompositeMetricsSink::new().with_sink(TracingMetricsSink);
    if let Some(path) = metrics_file {
        metrics = metrics.with_sink(JsonLinesMetricsSink::new(path));
    }

    let progress = Arc::new(ProgressReporter::new_spinner("Curating telemetry...", quiet));
    let cancel = CancellationFlag::new();
    let orchestrator = JobOrchestrator::new(config)?
        .with_metrics(Arc::new(metrics))
        .with_cancellation(cancel.clone())
        .with_progress(Arc::clone(&progress));

    let mut task = tokio::task::spawn_blocking(move || orchestrator.run(window));
    let deadline = async {
        match timeout_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let invocation = loop {
        tokio::select! {
            result = &mut task => break result??,
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
            _ = &mut deadline, if !cancel.is_cancelled() => {
                warn!(timeout_secs, "Run timed out, cancelling");
                cancel.cancel();
            }
        }
    };

    match invocation {
        Invocation::Completed(report) => {
            progress.finish_with_message(&format!("Run {}", report.status));
            if !quiet {
                println!("\n{}", report.summary());
            }
            Ok(exit_code(&report))
        }
        Invocation::ConcurrentRunRejected { holder } => {
            progress.finish_with_message("Skipped");
            if !quiet {
                println!("Another run is in progress (holder {}); nothing done", holder);
            }
            Ok(EXIT_OK)
        }
    }
}

async fn validate(job: JobArgs, quiet: bool) -> Result<i32> {
    let config = load_config(&job)?;
    let window = resolve_window(&job, Utc::now())?;

    let progress = Arc::new(ProgressReporter::new_spinner("Validating raw data...", quiet));
    let orchestrator = JobOrchestrator::new(config)?.with_progress(Arc::clone(&progress));
    let report = tokio::task::spawn_blocking(move || orchestrator.validate_window(window)).await??;

    progress.finish_with_message("Validation complete");
    if !quiet {
        println!("\n{}", report.summary());
        println!("Validation complete - no partitions written");
    }
    Ok(exit_code(&report))
}

fn show_partition_info(partition: &Path, sample: usize) -> Result<()> {
    let file = if partition.is_dir() {
        partition.join(PARTITION_FILE)
    } else {
        partition.to_path_buf()
    };

    println!("Analyzing partition: {}", file.display());

    let writer = ParquetWriter::new();
    let file_info = writer.get_file_info(&file)?;
    println!("\n{}", file_info.summary());

    if sample > 0 {
        let rows = writer.read_sample_rows(&file, sample)?;
        println!("\nSample rows ({}):", rows.rows.len());
        print!("{}", rows.render());
    }

    Ok(())
}

/// Layer CLI overrides on top of file and environment configuration
pub fn load_config(job: &JobArgs) -> Result<JobConfig> {
    let mut config = JobConfig::load(job.config.as_deref())?;

    if let Some(raw_root) = &job.raw_root {
        config.raw_root = raw_root.clone();
    }
    if let Some(curated_root) = &job.curated_root {
        config.curated_root = curated_root.clone();
    }
    if let Some(max_workers) = job.max_workers {
        config.max_workers = max_workers;
    }
    if let Some(compression) = &job.compression {
        config.compression = compression.clone();
    }

    let params = &mut config.params;
    for (target, value) in [
        (&mut params.bucket, &job.bucket),
        (&mut params.environment, &job.environment),
        (&mut params.database, &job.database),
        (&mut params.kms_key_ref, &job.kms_key_ref),
    ] {
        if value.is_some() {
            *target = value.clone();
        }
    }

    config.check()?;
    Ok(config)
}

/// Explicit `--start/--end`, or the trailing whole hours before `now`
pub fn resolve_window(job: &JobArgs, now: DateTime<Utc>) -> Result<RunWindow> {
    match (&job.start, &job.end) {
        (Some(start), Some(end)) => RunWindow::new(parse_bound(start)?, parse_bound(end)?),
        (None, None) => RunWindow::trailing_hours(now, job.window_hours),
        _ => Err(ProcessingError::Config(
            "--start and --end must be given together".to_string(),
        )),
    }
}

fn parse_bound(value: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(value)
        .ok_or_else(|| ProcessingError::InvalidFormat(format!("Invalid timestamp: {}", value)))
}

pub fn exit_code(report: &RunReport) -> i32 {
    match report.status {
        RunStatus::Succeeded => EXIT_OK,
        RunStatus::FailedValidationThreshold => EXIT_THRESHOLD,
        _ => EXIT_FAILED,
    }
}
