//! Reforecast archive downloader.
//!
//! Fetches selected GRIB messages from ensemble reforecast archives with
//! HTTP range requests:
//! - `bulk` walks the date range of a config file
//! - `get` downloads explicit parameters and dates
//! - `show` validates a config and logs the effective settings

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use reforecast_downloader::config::{ArchiveVersion, DownloaderConfig, Overrides};
use reforecast_downloader::finalize::{Subsetter, Wgrib2};
use reforecast_downloader::transfer_log::TransferLog;
use reforecast_downloader::transport::HttpTransport;
use reforecast_downloader::Runner;

#[derive(Parser, Debug)]
#[command(name = "reforecast-dl")]
#[command(about = "Partial downloads of GRIB reforecast archives")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(long, global = true)]
    verbose: bool,

    /// Write Prometheus metrics to this file when the run ends
    #[arg(long, global = true, env = "METRICS_FILE")]
    metrics_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download every job of the configured date range
    Bulk {
        /// Configuration file
        #[arg(short, long, env = "REFORECAST_CONFIG")]
        config: PathBuf,
    },
    /// Download explicit parameters and dates
    Get(GetArgs),
    /// Validate a configuration and log the effective settings
    Show {
        /// Configuration file (built-in settings when omitted)
        #[arg(short, long, env = "REFORECAST_CONFIG")]
        config: Option<PathBuf>,

        /// Archive version of the built-in settings
        #[arg(short = 'v', long)]
        version: Option<u8>,
    },
}

#[derive(ClapArgs, Debug)]
struct GetArgs {
    /// Configuration file (built-in settings when omitted)
    #[arg(short, long, env = "REFORECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Archive version, 2 or 12
    #[arg(short = 'v', long)]
    version: Option<u8>,

    /// Fetch individual members instead of ensemble statistics
    #[arg(short, long)]
    members: bool,

    /// Pressure levels in hPa
    #[arg(short, long, num_args = 1..)]
    levels: Vec<u32>,

    /// Lead times in hours
    #[arg(short, long, num_args = 1..)]
    steps: Vec<u32>,

    /// Parameters, e.g. tmp_pres
    #[arg(short, long = "param", num_args = 1.., required = true)]
    params: Vec<String>,

    /// Run dates, YYYY-MM-DD
    #[arg(short, long = "date", num_args = 1.., required = true)]
    dates: Vec<NaiveDate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = if args.verbose {
        Level::DEBUG
    } else {
        match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let prometheus: Option<PrometheusHandle> = match &args.metrics_file {
        Some(_) => Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("Failed to install Prometheus recorder")?,
        ),
        None => None,
    };

    let (config, dates) = match args.command {
        Command::Bulk { config } => {
            let config = DownloaderConfig::load(&config)?;
            let dates = config.dates()?;
            (config, dates)
        }
        Command::Get(get) => {
            let mut config = load_or_builtin(get.config.as_ref(), get.version)?;
            config.apply_overrides(Overrides {
                members: get.members,
                levels: get.levels,
                steps: get.steps,
                params: get.params,
            })?;
            (config, get.dates)
        }
        Command::Show { config, version } => {
            let config = load_or_builtin(config.as_ref(), version)?;
            config.log_summary();
            return Ok(());
        }
    };

    info!(jobs_per_date = jobs_per_date(&config), dates = dates.len(), "Starting reforecast download");
    config.log_summary();

    let transport = HttpTransport::new(config.connect_timeout())?;
    let wgrib2 = config
        .output
        .subset
        .map(|_| Wgrib2::new(config.transfer.subset_program.clone()));
    let transfer_log = match &config.transfer.log_file {
        Some(path) => Some(TransferLog::open(path).await?),
        None => None,
    };

    let summary = Runner::new(&config, &transport)
        .with_subsetter(wgrib2.as_ref().map(|tool| tool as &dyn Subsetter))
        .with_transfer_log(transfer_log.as_ref())
        .run(&dates)
        .await;
    summary.log();

    if let (Some(handle), Some(path)) = (prometheus, &args.metrics_file) {
        tokio::fs::write(path, handle.render())
            .await
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    if summary.has_failures() {
        warn!(failures = summary.failures(), "Some downloads failed");
        std::process::exit(1);
    }

    Ok(())
}

fn load_or_builtin(path: Option<&PathBuf>, version: Option<u8>) -> Result<DownloaderConfig> {
    let version = version
        .map(ArchiveVersion::try_from)
        .transpose()
        .map_err(anyhow::Error::msg)?;

    match path {
        Some(path) => {
            let config = DownloaderConfig::load(path)?;
            if let Some(version) = version {
                anyhow::ensure!(
                    version == config.version,
                    "--version {} does not match version {} of {}",
                    version,
                    config.version,
                    path.display()
                );
            }
            Ok(config)
        }
        None => {
            let version = version.unwrap_or_else(|| {
                warn!("No archive version given, using version 12");
                ArchiveVersion::V12
            });
            Ok(DownloaderConfig::builtin(version)?)
        }
    }
}

fn jobs_per_date(config: &DownloaderConfig) -> usize {
    config
        .parameters
        .iter()
        .map(|param| config.types_for(param).len())
        .sum()
}
