//! Baseband Pipeline Main Application
//!
//! Runs the frame-pipelined baseband against the loopback fronthaul and
//! prints a run summary.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::SharedState;
use scheduler::{run_pipeline, RunSummary};

use crate::config::BasebandConfig;

/// Frame-pipelined baseband scheduler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (.yml, .yaml or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Number of frames to run
    #[arg(long)]
    frames: Option<usize>,

    /// Number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Route decoded data through the MAC stub
    #[arg(long)]
    enable_mac: bool,

    /// Microseconds between frame starts
    #[arg(long)]
    frame_interval_us: Option<u64>,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

/// Load the configuration file if any and apply command line overrides
fn load_config(args: &Args) -> Result<BasebandConfig> {
    let mut config = match &args.config {
        Some(path) => BasebandConfig::from_file(path)?,
        None => BasebandConfig::default(),
    };
    if let Some(frames) = args.frames {
        config.pipeline.frames_to_test = frames;
    }
    if let Some(workers) = args.workers {
        config.pipeline.worker_thread_num = workers;
        // Dedicated stage lists are sized for the configured worker count
        config.pipeline.worker_stages = None;
    }
    if args.enable_mac {
        config.pipeline.enable_mac = true;
    }
    if let Some(interval) = args.frame_interval_us {
        config.transport.frame_interval_us = interval;
    }
    config.pipeline.validate()?;
    Ok(config)
}

fn log_summary(summary: &RunSummary) {
    info!("Run summary:");
    info!("  Finished: {}", summary.finished);
    info!("  Frames retired: {} ({:.1} frames/s)", summary.frames_retired, summary.frames_per_sec);
    info!(
        "  Frame latency: mean {:.3} ms, max {:.3} ms",
        summary.mean_frame_latency_ms, summary.max_frame_latency_ms
    );
    info!(
        "  Packets: {} received, {} stale, {} duplicate, {} sent, {} transmitted",
        summary.packets_received,
        summary.stale_packets,
        summary.duplicate_packets,
        summary.packets_sent,
        summary.tx_answered
    );
    info!("  Deferred frames: {}", summary.deferred_frames);
    info!("  Worker tasks: {}", summary.worker_tasks);
    if let Some(snr) = summary.mean_snr_db {
        info!("  MAC: {} deliveries, mean SNR {:.1} dB", summary.mac_deliveries, snr);
    }
    if summary.rejected_ran_updates > 0 {
        warn!("  RAN updates rejected: {}", summary.rejected_ran_updates);
    }
    if summary.snr_reports_dropped > 0 {
        warn!("  SNR reports dropped: {}", summary.snr_reports_dropped);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting baseband pipeline");
    if let Some(path) = &args.config {
        info!("Configuration file: {}", path.display());
    }

    let config = load_config(&args)?;
    info!("Pipeline configuration:");
    info!("  Frame schedule: {}", config.pipeline.frame_schedule);
    info!(
        "  Frame window: {}, deferral window: {}",
        config.pipeline.frame_window, config.pipeline.deferral_window
    );
    info!("  Antennas: {}, UEs: {}", config.pipeline.bs_ant_num, config.pipeline.ue_ant_num);
    info!("  Frames: {}", config.pipeline.frames_to_test);

    let shared = Arc::new(SharedState::new(config.link.mod_order_bits));
    let transport_options = config.transport.to_options();
    let pipeline_shared = shared.clone();
    let mut pipeline = tokio::task::spawn_blocking(move || {
        run_pipeline(config.pipeline, transport_options, pipeline_shared)
    });

    // Periodic progress report
    let stats_shared = shared.clone();
    let stats_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        interval.tick().await;
        loop {
            interval.tick().await;
            if !stats_shared.is_running() {
                break;
            }
            info!(
                "Progress: scheduling frame {}, oldest in flight {}",
                stats_shared.cur_sche_frame_id(),
                stats_shared.cur_proc_frame_id()
            );
        }
    });

    let result = tokio::select! {
        result = &mut pipeline => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            shared.stop();
            pipeline.await
        }
    };
    stats_task.abort();

    let summary = match result.context("Pipeline thread panicked")? {
        Ok(summary) => summary,
        Err(e) => {
            error!("Pipeline failed: {}", e);
            return Err(e.into());
        }
    };
    log_summary(&summary);

    if let Some(path) = &args.summary_json {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Summary written to {}", path.display());
    }

    info!("Baseband pipeline stopped");
    Ok(())
}
