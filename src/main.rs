use anyhow::Context;
use clap::Parser;
use telemetry_curator::cli::{logging, run, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet, cli.log_file.as_deref())
        .context("failed to set up logging")?;

    let code = run(cli).await.context("curation command failed")?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
