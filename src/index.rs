// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sub-log indexer: locates each independent sub-log within the raw
//! buffer and builds the every-4th-I-frame directory random access is
//! built on top of.

use tracing::{info, warn};

use crate::config::SysConfig;
use crate::dispatcher::{DecodeStats, DispatcherState, FrameEvent};
use crate::frame_def::{FrameDef, FrameKind};
use crate::header::parse_header;
use crate::stream::ByteStream;

/// Byte-exact marker that starts every sub-log.
pub const SUB_LOG_START_MARKER: &[u8] =
    b"H Product:Blackbox flight data recorder by Nicholas Sherlock\n";

#[derive(Debug, Clone, Default)]
pub struct SubLogDirectory {
    pub times: Vec<i64>,
    pub offsets: Vec<usize>,
    pub avg_throttle: Vec<i64>,
    pub initial_slow: Vec<Vec<i32>>,
    pub has_event: Vec<bool>,
    pub min_time: Option<i64>,
    pub max_time: Option<i64>,
    pub stats: DecodeStats,
    pub sys_config: SysConfig,
    pub i_def: FrameDef,
    pub p_def: FrameDef,
    pub s_def: FrameDef,
    pub error: Option<String>,
    /// Byte range within the whole-file buffer this sub-log occupies.
    pub start: usize,
    pub end: usize,
}

/// Finds every sub-log boundary in `buffer`, returning `(start, end)`
/// byte ranges (the last sub-log's range ends at `buffer.len()`).
pub fn find_sub_log_ranges(buffer: &[u8]) -> Vec<(usize, usize)> {
    let stream = ByteStream::new(buffer, 0, buffer.len());
    let marker_starts = stream.all_indices_of(SUB_LOG_START_MARKER);
    // `all_indices_of` already appends `end` as a sentinel; pair each
    // start with the next one (or the sentinel) to get ranges.
    let mut ranges = Vec::new();
    for i in 0..marker_starts.len().saturating_sub(1) {
        let start = marker_starts[i];
        let end = marker_starts[i + 1];
        if start != end {
            ranges.push((start, end));
        }
    }
    ranges
}

/// Builds the directory for one sub-log occupying `buffer[start..end]`.
pub fn index_sub_log(buffer: &[u8], start: usize, end: usize) -> SubLogDirectory {
    let mut dir = SubLogDirectory {
        start,
        end,
        ..Default::default()
    };

    let mut stream = ByteStream::new(buffer, start, end);
    let parsed = match parse_header(&mut stream) {
        Ok(p) => p,
        Err(e) => {
            warn!(start, "sub-log header failed to parse: {e}");
            dir.error = Some(format!(": {e}"));
            return dir;
        }
    };
    dir.sys_config = parsed.sys_config;
    dir.i_def = parsed.frame_defs.get(&FrameKind::Intra).cloned().unwrap_or_default();
    dir.p_def = parsed.frame_defs.get(&FrameKind::Predicted).cloned().unwrap_or_default();
    dir.s_def = parsed.frame_defs.get(&FrameKind::Slow).cloned().unwrap_or_default();

    let motor_indices: Vec<usize> = (0..8)
        .filter_map(|k| dir.i_def.index_of(&format!("motor[{k}]")))
        .collect();

    let mut dispatcher_state = DispatcherState::new(&dir.i_def, dir.s_def.count);
    let mut iframe_count: u64 = 0;
    let mut saw_end_marker = false;
    let data_version = dir.sys_config.data_version;

    run_indexing_pass(
        &mut stream,
        &parsed.frame_defs,
        &dir.sys_config,
        data_version,
        &mut dispatcher_state,
        &motor_indices,
        &mut dir,
        &mut iframe_count,
        &mut saw_end_marker,
    );

    dir.stats = dispatcher_state.stats;

    if dir.min_time.is_none() {
        dir.error = Some(if saw_end_marker {
            ": Logging paused, no data".to_string()
        } else {
            ": Log truncated, no data".to_string()
        });
    }

    info!(
        start,
        sub_log_chunks = dir.times.len(),
        "indexed sub-log"
    );
    dir
}

#[allow(clippy::too_many_arguments)]
fn run_indexing_pass(
    stream: &mut ByteStream,
    frame_defs: &std::collections::HashMap<FrameKind, FrameDef>,
    sys_config: &SysConfig,
    data_version: i32,
    state: &mut DispatcherState,
    motor_indices: &[usize],
    dir: &mut SubLogDirectory,
    iframe_count: &mut u64,
    saw_end_marker: &mut bool,
) {
    crate::dispatcher::run_frames(
        stream,
        frame_defs,
        sys_config,
        data_version,
        state,
        |event, offset| match event {
            FrameEvent::Intra(frame) => {
                let push = *iframe_count % 4 == 0;
                *iframe_count += 1;
                let time = frame.get(1).copied().unwrap_or(0) as i64;
                if push {
                    let avg_throttle = if motor_indices.is_empty() {
                        0
                    } else {
                        motor_indices.iter().map(|&i| frame[i] as i64).sum::<i64>()
                            / motor_indices.len() as i64
                    };
                    dir.times.push(time);
                    dir.offsets.push(offset);
                    dir.avg_throttle.push(avg_throttle);
                    dir.initial_slow.push(state.last_slow.clone());
                    dir.has_event.push(false);
                }
                dir.min_time = Some(dir.min_time.map_or(time, |t| t.min(time)));
                dir.max_time = Some(dir.max_time.map_or(time, |t| t.max(time)));
            }
            FrameEvent::Predicted(frame) => {
                let time = frame.get(1).copied().unwrap_or(0) as i64;
                dir.max_time = Some(dir.max_time.map_or(time, |t| t.max(time)));
            }
            FrameEvent::Slow(_) => {}
            FrameEvent::Event(record) => {
                if let Some(last) = dir.has_event.last_mut() {
                    *last = true;
                }
                if matches!(record.kind, crate::dispatcher::EventKind::LogEnd) {
                    *saw_end_marker = true;
                }
            }
            FrameEvent::Invalid { .. } => {}
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_log() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(SUB_LOG_START_MARKER);
        data.extend_from_slice(b"H I interval:32\n");
        data.extend_from_slice(b"H P interval:1/8\n");
        data.extend_from_slice(b"H Field I name:loopIteration,time,motor[0]\n");
        data.extend_from_slice(b"H Field I signed:0,0,0\n");
        data.extend_from_slice(b"H Field I predictor:0,0,0\n");
        data.extend_from_slice(b"H Field I encoding:1,1,1\n");
        data.extend_from_slice(b"H Field P predictor:1,1,1\n");
        data.extend_from_slice(b"H Field P encoding:0,0,0\n");
        data.push(b'I');
        data.push(0); // loopIteration = 0
        data.push(10); // time = 10
        data.push(100); // motor[0] = 100
        data
    }

    #[test]
    fn find_sub_log_ranges_locates_single_log() {
        let data = synthetic_log();
        let ranges = find_sub_log_ranges(&data);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].0, 0);
        assert_eq!(ranges[0].1, data.len());
    }

    #[test]
    fn index_sub_log_records_first_chunk_entry() {
        let data = synthetic_log();
        let dir = index_sub_log(&data, 0, data.len());
        assert_eq!(dir.times.len(), 1);
        assert_eq!(dir.times[0], 10);
        assert_eq!(dir.avg_throttle[0], 100);
    }

    #[test]
    fn missing_header_records_log_truncated_error() {
        let data = SUB_LOG_START_MARKER.to_vec();
        let dir = index_sub_log(&data, 0, data.len());
        assert!(dir.error.is_some());
    }
}
