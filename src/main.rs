//! CLI harness for the departures engine.
//!
//! Reads a departures block from YAML, builds the engine, loads the static
//! schedule, updates every sensor once and prints its state.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gtfs_rt_departures::{
    config::Config,
    engine::TransitData,
    output::{print_json, print_pretty},
    sensor::SensorFactory,
};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Level {
    Info,
    Debug,
}

#[derive(Parser)]
#[command(name = "gtfs_rt_departures")]
#[command(about = "Report the next departures from a GTFS-RT feed", long_about = None)]
struct Cli {
    /// Config file to use
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Log level for stderr (overrides RUST_LOG)
    #[arg(short, long, value_enum, ignore_case = true)]
    debug: Option<Level>,

    /// Print sensor states as JSON instead of debug output
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let cli = Cli::parse();

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/gtfs_rt_departures.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_departures.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_filter = match cli.debug {
        Some(Level::Debug) => EnvFilter::new("debug"),
        Some(Level::Info) => EnvFilter::new("info"),
        None => EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?),
    };

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

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

    let text = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("reading {}", cli.file.display()))?;
    let config = Config::from_yaml(&text).context("parsing configuration")?;

    let settings = match config.validate() {
        Ok((settings, _)) => settings,
        Err(e) => {
            error!(error = %e, "Input file configuration invalid");
            return Err(e.into());
        }
    };
    info!("Input file configuration is valid");

    let data = Arc::new(TransitData::new(settings)?);
    data.load_static_data().await;

    let mut sensors = SensorFactory::create_sensors_from_config(&config, data)?;
    for sensor in &mut sensors {
        let state = sensor.update().await;
        if cli.json {
            print_json(state)?;
        } else {
            print_pretty(state);
        }
    }

    Ok(())
}
