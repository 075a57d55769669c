//! CLI entry point for the EV charging-station load pipeline.
//!
//! Provides subcommands for reconstructing per-station load from raw session
//! logs, verifying a processed table, and serving forecasts over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use evflow::config::PipelineConfig;
use evflow::logging;
use evflow::output::print_json;
use evflow::pipeline::process_file;
use evflow::service::{api, context::ServiceContext};
use evflow::table::read_rows;
use evflow::verify::verify;
use evflow::windows::build_windows;
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "evflow")]
#[command(about = "Reconstructs and forecasts EV charging-station load", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn raw charging sessions into the processed per-station time series
    Process {
        /// Raw session CSV
        #[arg(short, long, env = "EVFLOW_INPUT")]
        input: PathBuf,

        /// Directory for the processed table, transforms and report
        #[arg(short, long, env = "EVFLOW_OUTPUT_DIR", default_value = "data/processed")]
        output_dir: PathBuf,

        /// Grid interval in minutes
        #[arg(
            long,
            env = "EVFLOW_INTERVAL_MINUTES",
            default_value_t = 15,
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        interval_minutes: u32,

        /// Charging time assumed for sessions with no usable duration
        #[arg(long, env = "EVFLOW_FALLBACK_MINUTES", default_value_t = 15.0)]
        fallback_minutes: f64,

        /// Worker threads for the per-station simulation
        #[arg(short, long, env = "EVFLOW_THREADS")]
        threads: Option<usize>,
    },
    /// Check a processed table and count the training windows it yields
    Verify {
        /// Processed table CSV
        #[arg(short, long, env = "EVFLOW_PROCESSED", default_value = "data/processed/processed_data.csv")]
        input: PathBuf,

        /// Window length in rows
        #[arg(short, long, env = "EVFLOW_SEQ_LENGTH", default_value_t = 48)]
        seq_length: usize,
    },
    /// Serve predictions and attributions over HTTP
    Serve {
        /// Address to listen on
        #[arg(short, long, env = "EVFLOW_BIND", default_value = "127.0.0.1:8000")]
        bind: String,

        /// Directory written by `process`
        #[arg(short, long, env = "EVFLOW_ARTIFACTS_DIR", default_value = "data/processed")]
        artifacts_dir: PathBuf,

        /// Window length in rows
        #[arg(short, long, env = "EVFLOW_SEQ_LENGTH", default_value_t = 48)]
        seq_length: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| logging::DEFAULT_LOG_FILE.to_string());
    let _log_guard = logging::init(&log_file_path)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            output_dir,
            interval_minutes,
            fallback_minutes,
            threads,
        } => {
            let config = PipelineConfig {
                interval_minutes,
                fallback_charge_minutes: fallback_minutes,
                threads,
            };
            let report = tokio::task::spawn_blocking(move || {
                process_file(&input, &output_dir, &config)
            })
            .await??;
            print_json(&report)?;
        }
        Commands::Verify { input, seq_length } => {
            let report = verify(&input)?;
            let rows = read_rows(&input)?;
            let windows = build_windows(&rows, seq_length).len();
            info!(windows, seq_length, "Training windows");

            print_json(&json!({ "report": report, "windows": windows }))?;
            if !report.is_clean() {
                warn!(warnings = report.warnings.len(), "Processed table has problems");
            }
        }
        Commands::Serve {
            bind,
            artifacts_dir,
            seq_length,
        } => {
            let ctx = Arc::new(ServiceContext::new(artifacts_dir, seq_length));
            if let Err(e) = ctx.artifacts().await {
                error!("Artifacts not loaded at startup, will retry on first request: {e:#}");
            }
            api::serve(&bind, ctx).await?;
        }
    }

    Ok(())
}
