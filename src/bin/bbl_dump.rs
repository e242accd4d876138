// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! bbl-dump - Dump a blackbox sub-log's decoded frames as CSV.
//!
//! Usage:
//!   bbl-dump --input capture.bbl --log 0 > capture.csv
//!   bbl-dump --input capture.bbl --log 0 --start 1000000 --end 2000000

use std::io::Write;
use std::path::PathBuf;

use blackbox_log::LogFile;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bbl-dump")]
#[command(about = "Dump a blackbox sub-log's decoded frames as CSV")]
#[command(version)]
struct Args {
    /// Input blackbox recording (.bbl/.txt)
    #[arg(short, long)]
    input: PathBuf,

    /// Sub-log index to dump
    #[arg(short, long, default_value = "0")]
    log: usize,

    /// Start time in microseconds (default: the sub-log's first frame)
    #[arg(long)]
    start: Option<i64>,

    /// End time in microseconds (default: the sub-log's last frame)
    #[arg(long)]
    end: Option<i64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::WARN);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let buffer = std::fs::read(&args.input)?;
    let mut log = LogFile::open(buffer);
    log.open_log(args.log)?;

    let start = args.start.or_else(|| log.get_min_time()).unwrap_or(0);
    let end = args.end.or_else(|| log.get_max_time()).unwrap_or(0);
    info!("dumping sub-log {} from {start} to {end}", args.log);

    let names = log.get_main_field_names();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", names.join(","))?;

    let chunks = log.get_chunks_in_time_range(start, end)?;
    for chunk in chunks {
        for frame in &chunk.frames {
            let row: Vec<String> = frame.iter().map(|v| v.to_string()).collect();
            writeln!(out, "{}", row.join(","))?;
        }
    }

    Ok(())
}
