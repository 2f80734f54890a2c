use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "telemetry-curator")]
#[command(about = "Curates raw weather and sensor telemetry into partitioned Parquet tables")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Only log errors and hide progress")]
    pub quiet: bool,

    #[arg(long, global = true, help = "Log file path")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one curation job over a time window
    Run {
        #[command(flatten)]
        job: JobArgs,

        #[arg(long, help = "Append the run report as a JSON line to this file")]
        metrics_file: Option<PathBuf>,

        #[arg(long, help = "Cancel the run after this many seconds")]
        timeout_secs: Option<u64>,
    },

    /// Read and validate a window without writing anything
    Validate {
        #[command(flatten)]
        job: JobArgs,
    },

    /// Display information about a curated partition
    Info {
        #[arg(short, long, help = "Partition directory or Parquet file")]
        partition: PathBuf,

        #[arg(short, long, default_value = "10")]
        sample: usize,
    },
}

/// Options shared by the commands that read the raw zone.
#[derive(Args, Debug, Clone, Default)]
pub struct JobArgs {
    #[arg(short, long, help = "TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub raw_root: Option<PathBuf>,

    #[arg(long)]
    pub curated_root: Option<PathBuf>,

    #[arg(long, help = "Window start (ISO-8601)", requires = "end")]
    pub start: Option<String>,

    #[arg(long, help = "Window end, exclusive (ISO-8601)", requires = "start")]
    pub end: Option<String>,

    #[arg(
        long,
        default_value = "1",
        conflicts_with = "start",
        help = "Whole hours ending at the current hour"
    )]
    pub window_hours: u32,

    #[arg(long)]
    pub max_workers: Option<usize>,

    #[arg(long)]
    pub compression: Option<String>,

    #[arg(long)]
    pub bucket: Option<String>,

    #[arg(long)]
    pub environment: Option<String>,

    #[arg(long)]
    pub database: Option<String>,

    #[arg(long)]
    pub kms_key_ref: Option<String>,
}
