//! eis-analytics - EIS battery session analytics
//!
//! # Usage
//!
//! ```bash
//! # Replay every export under a data directory
//! eis-analytics replay --data-dir ./data
//!
//! # Replay a single file as B03 / Test_2 at 40% SoC
//! eis-analytics replay --file run.csv --battery-id B03 --test-id Test_2 --soc 40
//!
//! # Stream JSON requests, one per line
//! cat requests.jsonl | eis-analytics stdin
//!
//! # Validate and print the effective configuration
//! eis-analytics --config eis_config.toml check-config
//! ```
//!
//! # Environment Variables
//!
//! - `EIS_CONFIG`: Path to the engine config (default: ./eis_config.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use eis_analytics::config::defaults;
use eis_analytics::config::EngineConfig;
use eis_analytics::ingest::EisFileInfo;
use eis_analytics::pipeline::{CsvReplaySource, LoopStats, ProcessingLoop, RequestSource, StdinSource};
use eis_analytics::{FileStorageProvider, SessionEngine, TracingListener};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "eis-analytics")]
#[command(about = "Streaming analytics for EIS battery test sessions")]
#[command(version)]
struct CliArgs {
    /// Engine config file (overrides EIS_CONFIG and ./eis_config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Replay EIS CSV exports through the engine
    Replay {
        /// Directory searched for exports
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Replay one CSV file instead of discovering
        #[arg(long, conflicts_with = "data_dir")]
        file: Option<PathBuf>,
        /// Battery id for --file
        #[arg(long, default_value = defaults::HIOKI_BATTERY_ID)]
        battery_id: String,
        /// Test id for --file
        #[arg(long, default_value = defaults::HIOKI_TEST_ID)]
        test_id: String,
        /// State of charge for --file
        #[arg(long)]
        soc: Option<i32>,
        /// Delay between samples in milliseconds (0 = no delay)
        #[arg(long, default_value = "0")]
        delay_ms: u64,
        /// Also write unparsable CSV rows under this directory
        #[arg(long)]
        parse_rejects: Option<PathBuf>,
    },

    /// Read JSON engine requests from stdin, one per line
    Stdin,

    /// Validate the configuration and print it as TOML
    CheckConfig,
}

// ============================================================================
// Helpers
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => Ok(EngineConfig::load()),
    }
}

fn single_file(path: PathBuf, battery_id: String, test_id: String, soc: Option<i32>) -> Result<EisFileInfo> {
    let Some(soc_percent) = soc else {
        bail!("--soc is required with --file");
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(EisFileInfo {
        battery_id,
        test_id,
        soc_percent,
        path,
        file_name,
    })
}

async fn run_pipeline<S: RequestSource>(
    config: EngineConfig,
    mut source: S,
    cancel_token: CancellationToken,
) -> Result<LoopStats> {
    let provider = FileStorageProvider::new(config.storage.root.clone());
    let engine = Arc::new(SessionEngine::new(config, provider));
    engine.subscribe(TracingListener)?;

    let stats = ProcessingLoop::new(engine, cancel_token)
        .run(&mut source)
        .await;
    Ok(stats)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.json);

    let config = load_config(args.config.as_ref())?;

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    match args.command {
        SubCommand::CheckConfig => {
            println!("{}", config.to_toml()?);
            info!("Configuration is valid");
        }
        SubCommand::Stdin => {
            info!("Input: stdin (JSON engine requests)");
            run_pipeline(config, StdinSource::new(), cancel_token).await?;
        }
        SubCommand::Replay {
            data_dir,
            file,
            battery_id,
            test_id,
            soc,
            delay_ms,
            parse_rejects,
        } => {
            let thresholds = config.session_defaults.clone();
            let mut source = match (data_dir, file) {
                (_, Some(path)) => CsvReplaySource::new(
                    vec![single_file(path, battery_id, test_id, soc)?],
                    thresholds,
                    delay_ms,
                ),
                (Some(dir), None) => CsvReplaySource::from_dir(&dir, thresholds, delay_ms)?,
                (None, None) => bail!("replay needs --data-dir or --file"),
            };
            if let Some(dir) = parse_rejects {
                source = source.with_parse_rejects(dir);
            }
            info!(
                "Input: CSV replay ({} files, {}ms delay between samples)",
                source.remaining_files(),
                delay_ms
            );
            let stats = run_pipeline(config, source, cancel_token).await?;
            info!(
                "Replay complete: {} sessions, {} failed requests",
                stats.sessions_completed,
                stats.failures()
            );
        }
    }

    Ok(())
}
