//! CLI entry point for rhx-stream
//!
//! - `watch`: follow a recording directory and report stimulation activity
//! - `stim`: decode a finished stimulation file offline
//! - `info`: print the header of a recording
//!
//! # Usage
//! ```bash
//! rhx-stream watch /data/recordings --span-ms 500
//! rhx-stream stim /data/recordings/session_1/stim-A-000.dat --json
//! rhx-stream info /data/recordings/session_1/info.rhs
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rhx_stream::config::StreamConfig;
use rhx_stream::decode::{RecordCodec, StimDecoded, StimFlags, StimulationCodec};
use rhx_stream::metadata::RecordingInfo;
use rhx_stream::pipeline::StreamPipeline;
use rhx_stream::reader::ReadOutcome;
use rhx_stream::telemetry;
use rhx_stream::window::TimeSpan;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "rhx-stream")]
#[command(about = "Real-time reader for recordings that are still being written", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/rhx_stream.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a recording directory and log stimulation events
    Watch {
        /// Directory the acquisition software writes into
        directory: PathBuf,

        /// Duration of each read in milliseconds
        #[arg(long, default_value = "500")]
        span_ms: u64,

        /// Pause between reads in milliseconds
        #[arg(long, default_value = "200")]
        interval_ms: u64,

        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Decode a stimulation file
    Stim {
        /// Path to a stim-*.dat file
        file: PathBuf,

        /// Current step size; overrides the configured value
        #[arg(long)]
        step_size: Option<f64>,

        /// Print every sample as JSON instead of only the non-zero ones
        #[arg(long)]
        json: bool,
    },

    /// Print the recording header
    Info {
        /// Path to info.rhs
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => StreamConfig::load_from(path),
        None => StreamConfig::load(),
    }
    .context("loading configuration")?;
    telemetry::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Watch {
            directory,
            span_ms,
            interval_ms,
            seconds,
        } => watch(config, directory, span_ms, interval_ms, seconds).await,
        Commands::Stim {
            file,
            step_size,
            json,
        } => decode_stim(
            &file,
            step_size.unwrap_or(config.acquisition.stim_step_size),
            json,
        ),
        Commands::Info { file } => print_info(&file),
    }
}

async fn watch(
    config: StreamConfig,
    directory: PathBuf,
    span_ms: u64,
    interval_ms: u64,
    seconds: Option<u64>,
) -> Result<()> {
    let pipeline = StreamPipeline::start(config)?;
    pipeline
        .set_monitoring_directory(&directory)
        .with_context(|| format!("monitoring {}", directory.display()))?;
    let mut reader = pipeline.reader();

    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => break,
        }

        match reader.read(span_ms)? {
            ReadOutcome::Ready(span) => report_span(&span),
            ReadOutcome::Insufficient { collected, needed } => {
                debug!(collected, needed, ready = pipeline.is_ready(), "Waiting for data");
            }
        }
    }

    let stats = pipeline.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    pipeline.shutdown();
    Ok(())
}

/// Log every stimulation channel that carried non-zero current in `span`.
fn report_span(span: &TimeSpan) {
    let start = span.timestamps.first().copied().unwrap_or_default();
    let mut active = 0;
    for (index, channel) in span.stimulation.rows().enumerate() {
        let pulses = channel.iter().filter(|&&v| v != 0.0).count();
        if pulses == 0 {
            continue;
        }
        active += 1;
        let peak = channel.iter().fold(0.0_f64, |acc, &v| acc.max(v.abs()));
        info!(
            channel = index + 1,
            start_s = start,
            samples = pulses,
            peak,
            "Stimulation"
        );
    }
    let compliance = span
        .stim_flags
        .as_slice()
        .iter()
        .filter(|f| f.contains(StimFlags::COMPLIANCE_LIMIT))
        .count();
    if compliance > 0 {
        warn!(samples = compliance, start_s = start, "Compliance limit reached");
    }
    debug!(
        first_sample = span.first_sample,
        samples = span.len(),
        active_channels = active,
        "Span read"
    );
}

fn decode_stim(file: &Path, step_size: f64, json: bool) -> Result<()> {
    let raw = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let decoded: StimDecoded = StimulationCodec::new(step_size).convert(&raw);

    if json {
        println!("{}", serde_json::to_string(&decoded)?);
        return Ok(());
    }

    let mut nonzero = 0;
    for (sample, (current, flags)) in decoded.current.iter().zip(&decoded.flags).enumerate() {
        if *current == 0.0 {
            continue;
        }
        nonzero += 1;
        println!("{sample}\t{current}\t{flags:?}");
    }
    let count = |flags: Vec<bool>| flags.into_iter().filter(|&b| b).count();
    info!(
        file = %file.display(),
        samples = decoded.len(),
        nonzero,
        compliance_limit = count(decoded.compliance_limit()),
        charge_recovery = count(decoded.charge_recovery()),
        amp_settle = count(decoded.amp_settle()),
        "Decoded stimulation file"
    );
    Ok(())
}

fn print_info(file: &Path) -> Result<()> {
    let info = RecordingInfo::read_path(file)?;
    if !info.has_rhs_magic() {
        warn!(file = %file.display(), "Header magic does not match RHS");
    }
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
