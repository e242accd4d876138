// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoder for Betaflight/Cleanflight/INAV blackbox flight log files.
//!
//! A blackbox file is a sequence of one or more independent *sub-logs*
//! (one per arm/disarm cycle), each an ASCII header followed by a
//! binary stream of `I`/`P`/`S`/`E` (and pass-through `G`/`H` GPS)
//! frames. [`LogFile`] indexes every sub-log on load, then gives random
//! access to a chosen sub-log's decoded frames via [`LogFile::open_log`]
//! and [`LogFile::get_chunks_in_time_range`].
//!
//! # Quick start
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! let buffer = std::fs::read("capture.bbl")?;
//! let mut log = blackbox_log::LogFile::open(buffer);
//! log.open_log(0)?;
//! let (min, max) = (log.get_min_time(), log.get_max_time());
//! if let (Some(min), Some(max)) = (min, max) {
//!     let chunks = log.get_chunks_in_time_range(min, max)?;
//!     println!("decoded {} chunks", chunks.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod facade;
pub mod frame_def;
pub mod header;
pub mod index;
pub mod rates;
pub mod stream;

pub use config::{FirmwareType, SysConfig};
pub use dispatcher::{DecodeStats, EventKind, EventRecord, FieldStat};
pub use error::{DecodeError, FrameError, HeaderError};
pub use facade::{Chunk, EventOccurrence, LogFile, MergedStats, OpenLog};
pub use frame_def::{FrameDef, FrameKind};
pub use index::SubLogDirectory;
