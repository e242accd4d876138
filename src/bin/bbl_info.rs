// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! bbl-info - Summarize a blackbox log file's sub-logs.
//!
//! Usage:
//!   bbl-info --input capture.bbl
//!   bbl-info --input capture.bbl --log 1

use std::path::PathBuf;

use blackbox_log::LogFile;
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "bbl-info")]
#[command(about = "Summarize a blackbox log file's sub-logs")]
#[command(version)]
struct Args {
    /// Input blackbox recording (.bbl/.txt)
    #[arg(short, long)]
    input: PathBuf,

    /// Restrict output to one sub-log index (default: all)
    #[arg(short, long)]
    log: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let buffer = std::fs::read(&args.input)?;
    let mut log = LogFile::open(buffer);

    info!("bbl-info v{}", env!("CARGO_PKG_VERSION"));
    info!("Input: {}", args.input.display());
    info!("Sub-logs: {}", log.get_log_count());

    let indices: Vec<usize> = match args.log {
        Some(i) => vec![i],
        None => (0..log.get_log_count()).collect(),
    };

    for index in indices {
        if index >= log.get_log_count() {
            warn!("sub-log index {index} does not exist");
            continue;
        }

        info!("--- sub-log {index} ---");
        if let Some(err) = log.get_log_error(index) {
            warn!("  error: {err}");
            continue;
        }

        if let Err(e) = log.open_log(index) {
            warn!("  failed to open: {e}");
            continue;
        }

        let cfg = log.get_sys_config().expect("opened log has sys config");
        info!("  firmware: {:?} {}", cfg.firmware_type, cfg.firmware_version);
        info!("  I interval: {}, P interval: {}/{}", cfg.frame_interval_i, cfg.p_num, cfg.p_denom);
        if let (Some(min), Some(max)) = (log.get_min_time(), log.get_max_time()) {
            info!("  time range: {min} .. {max} us ({:.2}s)", (max - min) as f64 / 1_000_000.0);
        }
        info!("  fields: {}", log.get_main_field_names().len());
        if !cfg.unknown_headers.is_empty() {
            info!("  unrecognized headers: {}", cfg.unknown_headers.len());
        }

        if let Some(stats) = log.get_stats() {
            info!(
                "  frames: I={} P={} S={} E={} corrupt={}",
                stats.raw.intra.valid_count,
                stats.raw.predicted.valid_count,
                stats.raw.slow.valid_count,
                stats.raw.event.valid_count,
                stats.raw.total_corrupted_frames,
            );
        }
    }

    Ok(())
}
