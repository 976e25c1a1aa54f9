//! CLI entry point for the province flux pipeline.
//!
//! Provides subcommands for downloading the daily MITMA mobility files,
//! aggregating them to province level, and deriving the flow-map and
//! mobility-index tables from the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use province_flux::config::{DEFAULT_PROVINCE_DIGITS, DEFAULT_WORKERS, Location, MaestraVersion};
use province_flux::download::{DownloadOptions, download};
use province_flux::fetch::{BasicClient, WithHeader};
use province_flux::flowmap::{FlowmapPaths, generate_flowmap};
use province_flux::index::{IndexPaths, generate_index};
use province_flux::infra::nominatim::NominatimClient;
use province_flux::{PipelineConfig, RunOutcome, process};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const USER_AGENT: &str = concat!("province_flux/", env!("CARGO_PKG_VERSION"));

#[derive(Parser)]
#[command(name = "province_flux")]
#[command(about = "Aggregate MITMA daily mobility files into province-level flows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct SourceArgs {
    /// Root of the data directory (raw/ and processed/ live below it)
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Zoning release of the source files
    #[arg(long = "maestra-version", value_enum, default_value_t = MaestraVersion::Maestra1)]
    maestra: MaestraVersion,

    /// Zoning level of the source files
    #[arg(long, value_enum, default_value_t = Location::Municipios)]
    location: Location,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Append new days to the persisted dataset instead of rebuilding it
    #[arg(short, long, default_value_t = false)]
    update: bool,

    /// Update or download even when the usual checks say not to
    #[arg(short, long, default_value_t = false)]
    force: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download daily files from the open-data portal
    Download {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Skip TLS certificate verification
        #[arg(long, default_value_t = false)]
        insecure: bool,
    },
    /// Aggregate stored daily files into province_flux.csv
    Process {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Number of day-files aggregated concurrently
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Leading digits of a zone code that identify its province
        #[arg(long, default_value_t = DEFAULT_PROVINCE_DIGITS)]
        province_digits: usize,
    },
    /// Build the flow-map tables from province_flux.csv
    Flowmap {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Build the mobility-index table from the flow-map tables
    Index {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Download, process, and rebuild the flow-map and index tables
    Run {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        run: RunArgs,

        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        #[arg(long, default_value_t = false)]
        insecure: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/province_flux.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("province_flux.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Download {
            source,
            run,
            insecure,
        } => {
            let config = pipeline_config(&source, &run, DEFAULT_WORKERS, DEFAULT_PROVINCE_DIGITS);
            download_files(&config, &run, insecure).await?;
        }
        Commands::Process {
            source,
            run,
            workers,
            province_digits,
        } => {
            let config = pipeline_config(&source, &run, workers, province_digits);
            process_files(&config).await?;
        }
        Commands::Flowmap { source } => {
            let config = PipelineConfig::new(&source.data_dir).with_source(source.maestra, source.location);
            flowmap(&config).await?;
        }
        Commands::Index { source } => {
            let config = PipelineConfig::new(&source.data_dir).with_source(source.maestra, source.location);
            index(&config)?;
        }
        Commands::Run {
            source,
            run,
            workers,
            insecure,
        } => {
            let config = pipeline_config(&source, &run, workers, DEFAULT_PROVINCE_DIGITS);
            download_files(&config, &run, insecure).await?;
            if process_files(&config).await? {
                flowmap(&config).await?;
                index(&config)?;
            }
        }
    }

    Ok(())
}

fn pipeline_config(source: &SourceArgs, run: &RunArgs, workers: usize, province_digits: usize) -> PipelineConfig {
    let mut config = PipelineConfig::new(&source.data_dir)
        .with_source(source.maestra, source.location)
        .with_update(run.update, run.force)
        .with_workers(workers);
    config.province_digits = province_digits;
    config
}

async fn download_files(config: &PipelineConfig, run: &RunArgs, insecure: bool) -> Result<()> {
    let client = if insecure {
        warn!("TLS certificate verification disabled");
        BasicClient::insecure().context("building HTTP client")?
    } else {
        BasicClient::new()
    };
    let opts = DownloadOptions {
        update: run.update,
        force: run.force,
        ..DownloadOptions::default()
    };
    let written = download(&client, config, &opts).await?;
    info!(files = written.len(), "Download complete");
    Ok(())
}

/// Returns whether the dataset was (re)written.
async fn process_files(config: &PipelineConfig) -> Result<bool> {
    match process(config).await? {
        RunOutcome::Written(summary) => {
            info!(
                days = summary.days,
                new_rows = summary.new_rows,
                total_rows = summary.total_rows,
                first = ?summary.first,
                last = ?summary.last,
                output = %config.output_path.display(),
                "Processing finished"
            );
            Ok(true)
        }
        RunOutcome::NoInput => {
            info!("Dataset already up-to-date");
            Ok(false)
        }
    }
}

async fn flowmap(config: &PipelineConfig) -> Result<()> {
    let geocoder = NominatimClient::new(WithHeader::user_agent(BasicClient::new(), USER_AGENT));
    let paths = FlowmapPaths::in_dir(&config.processed_dir());
    generate_flowmap(&config.output_path, &paths, &geocoder)
        .await
        .with_context(|| format!("building flow-map tables from {}", config.output_path.display()))?;
    Ok(())
}

fn index(config: &PipelineConfig) -> Result<()> {
    let paths = IndexPaths::in_dir(&config.processed_dir());
    generate_index(&paths).context("building mobility index")?;
    Ok(())
}
