use anyhow::Context;
use clap::Parser;
use ois_rate_fetcher::config::LoggingConfig;
use ois_rate_fetcher::{FetcherConfig, OisError, OisPipeline};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Fetch the OIS curve, derive the 1M OIS and implied policy rates, and store them
#[derive(Parser, Debug)]
#[command(name = "ois-rate-fetcher", version, about)]
struct Args {
    /// Configuration file (defaults to ois-fetcher.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fetch and derive without writing to the store
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = FetcherConfig::load(args.config.as_deref());
    let logging = config.as_ref().map(|c| c.logging.clone()).unwrap_or_default();
    if let Err(e) = init_logging(&logging) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(config, args.dry_run).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(stage = %e.stage(), "OIS rate fetch failed in {} stage: {}", e.stage(), e);
            ExitCode::from(e.stage().exit_code())
        }
    }
}

async fn run(config: ois_rate_fetcher::Result<FetcherConfig>, dry_run: bool) -> Result<(), OisError> {
    let config = config?;
    info!("Starting OIS rate fetcher (dry run: {})", dry_run);
    info!(
        "Source {:?} ({}), table {}, metric ids {} / {}",
        config.source.kind,
        config.source.name,
        config.store.table_name,
        config.metrics.ois_1m_id,
        config.metrics.implied_ff_id
    );

    let pipeline = OisPipeline::from_config(config, dry_run).await?;
    pipeline.run().await?;
    Ok(())
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log filter")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json { builder.json().try_init() } else { builder.try_init() };
    result.map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))
}
