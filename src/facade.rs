// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Public facade: opens a chosen sub-log and exposes random access to
//! its decoded frames, with derived/computed fields injected into each
//! main frame.

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::config::SysConfig;
use crate::dispatcher::{DecodeStats, DispatcherState, EventKind, FieldStat, FrameEvent};
use crate::error::DecodeError;
use crate::frame_def::FrameDef;
use crate::index::{find_sub_log_ranges, index_sub_log, SubLogDirectory};
use crate::rates::{gyro_raw_to_deg_per_sec, rc_command_raw_to_deg_per_sec};
use crate::stream::ByteStream;

/// Computed fields appended after the raw field vector, in this fixed
/// order; trailing slots whose source data is missing are truncated
/// rather than padded.
const ADDITIONAL_COMPUTED_FIELD_COUNT: usize = 20;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EventOccurrence {
    pub kind: EventKind,
    pub time: i64,
}

/// The contiguous run of main frames between two every-4th-I-frame
/// index entries — the unit of random access.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub index: usize,
    pub frames: Vec<Vec<i32>>,
    pub events: Vec<EventOccurrence>,
    pub gap_starts_here: HashSet<usize>,
}

/// An opened sub-log's field-name union, ready to pair with [`Chunk`]
/// rows: `I.name ∥ S.name ∥ computed field names`.
pub struct OpenLog {
    pub index: usize,
    pub field_names: Vec<String>,
    pub num_motors: usize,
    pub num_cells: usize,
}

pub struct LogFile {
    buffer: Vec<u8>,
    directories: Vec<SubLogDirectory>,
    current: Option<OpenLog>,
    chunk_cache: HashMap<usize, Chunk>,
}

impl LogFile {
    /// Loads and indexes every sub-log in `buffer`. Indexing never fails
    /// outright: a malformed sub-log is recorded with a non-empty
    /// `directory.error` and simply can't be opened.
    pub fn open(buffer: Vec<u8>) -> Self {
        let ranges = find_sub_log_ranges(&buffer);
        let directories = ranges
            .into_iter()
            .map(|(start, end)| index_sub_log(&buffer, start, end))
            .collect();
        Self {
            buffer,
            directories,
            current: None,
            chunk_cache: HashMap::new(),
        }
    }

    pub fn get_log_count(&self) -> usize {
        self.directories.len()
    }

    pub fn get_log_error(&self, index: usize) -> Option<&str> {
        self.directories.get(index).and_then(|d| d.error.as_deref())
    }

    /// Opens sub-log `index`, rebuilding field names and invalidating
    /// the chunk cache. Fails if that sub-log's directory carries an
    /// error.
    pub fn open_log(&mut self, index: usize) -> Result<(), DecodeError> {
        let dir = self
            .directories
            .get(index)
            .ok_or(DecodeError::LogNotFound(index))?;
        if let Some(err) = &dir.error {
            return Err(DecodeError::SubLogError {
                index,
                message: err.clone(),
            });
        }

        let field_names = build_field_names(dir);
        let num_motors = (0..8)
            .filter(|k| dir.i_def.index_of(&format!("motor[{k}]")).is_some())
            .count();
        let num_cells = estimate_cell_count(dir);

        self.current = Some(OpenLog {
            index,
            field_names,
            num_motors,
            num_cells,
        });
        self.chunk_cache.clear();
        info!(index, "opened sub-log");
        Ok(())
    }

    fn current_dir(&self) -> Option<&SubLogDirectory> {
        self.current.as_ref().map(|c| &self.directories[c.index])
    }

    pub fn get_main_field_names(&self) -> Vec<String> {
        self.current.as_ref().map(|c| c.field_names.clone()).unwrap_or_default()
    }

    pub fn get_main_field_index_by_name(&self, name: &str) -> Option<usize> {
        self.current
            .as_ref()
            .and_then(|c| c.field_names.iter().position(|n| n == name))
    }

    pub fn get_sys_config(&self) -> Option<&SysConfig> {
        self.current_dir().map(|d| &d.sys_config)
    }

    pub fn get_min_time(&self) -> Option<i64> {
        self.current_dir().and_then(|d| d.min_time)
    }

    pub fn get_max_time(&self) -> Option<i64> {
        self.current_dir().and_then(|d| d.max_time)
    }

    /// The raw stats with a merged `field` array: `I.field ∥ S.field` if
    /// an `S` definition is present, else just `I.field`.
    pub fn get_stats(&self) -> Option<MergedStats> {
        let dir = self.current_dir()?;
        let mut field = dir.stats.main_field.clone();
        if dir.s_def.count > 0 {
            field.extend(dir.stats.slow_field.clone());
        }
        Some(MergedStats {
            raw: dir.stats.clone(),
            field,
        })
    }

    pub fn get_activity_summary(&self) -> Option<(&[i64], &[i64], &[bool])> {
        let dir = self.current_dir()?;
        Some((&dir.times, &dir.avg_throttle, &dir.has_event))
    }

    /// Binary-searches the directory for the chunks spanning `[t0, t1]`
    /// (inclusive), decoding each one and injecting computed fields.
    pub fn get_chunks_in_time_range(&mut self, t0: i64, t1: i64) -> Result<Vec<Chunk>, DecodeError> {
        self.chunks_in_range(t0, t1, false)
    }

    /// Same as [`Self::get_chunks_in_time_range`], but the upper bound
    /// uses binary-search-or-next rather than binary-search-or-previous.
    pub fn get_smoothed_chunks_in_time_range(
        &mut self,
        t0: i64,
        t1: i64,
    ) -> Result<Vec<Chunk>, DecodeError> {
        self.chunks_in_range(t0, t1, true)
    }

    fn chunks_in_range(&mut self, t0: i64, t1: i64, smoothed_upper: bool) -> Result<Vec<Chunk>, DecodeError> {
        let index = self
            .current
            .as_ref()
            .ok_or(DecodeError::LogNotFound(usize::MAX))?
            .index;
        let times = self.directories[index].times.clone();
        if times.is_empty() {
            return Ok(Vec::new());
        }

        let lo = binary_search_or_previous(&times, t0);
        let hi = if smoothed_upper {
            binary_search_or_next(&times, t1)
        } else {
            binary_search_or_previous(&times, t1)
        };

        let mut out = Vec::new();
        for c in lo..=hi.min(times.len() - 1) {
            out.push(self.decode_chunk(index, c)?);
        }
        Ok(out)
    }

    /// `chunk_cache` is keyed by chunk index alone; this is sound only
    /// because `open_log` clears it on every switch, so it never holds
    /// entries from a sub-log other than the one currently open.
    fn decode_chunk(&mut self, log_index: usize, chunk_index: usize) -> Result<Chunk, DecodeError> {
        if let Some(cached) = self.chunk_cache.get(&chunk_index) {
            return Ok(cached.clone());
        }

        let dir = &self.directories[log_index];
        let start = dir.offsets[chunk_index];
        let end = dir
            .offsets
            .get(chunk_index + 1)
            .copied()
            .unwrap_or(dir.end);

        let mut stream = ByteStream::new(&self.buffer, start, end);
        let mut state = DispatcherState::new(&dir.i_def, dir.s_def.count);

        let time_index = dir.i_def.index_of("time").unwrap_or(1);
        let mut frame_defs = HashMap::new();
        frame_defs.insert(crate::frame_def::FrameKind::Intra, dir.i_def.clone());
        frame_defs.insert(crate::frame_def::FrameKind::Predicted, dir.p_def.clone());
        if dir.s_def.count > 0 {
            frame_defs.insert(crate::frame_def::FrameKind::Slow, dir.s_def.clone());
        }

        let mut chunk = Chunk {
            index: chunk_index,
            ..Default::default()
        };
        let mut pending_events: Vec<(EventKind, usize)> = Vec::new();
        let mut last_slow = dir.initial_slow[chunk_index].clone();
        let data_version = dir.sys_config.data_version;

        crate::dispatcher::run_frames(
            &mut stream,
            &frame_defs,
            &dir.sys_config,
            data_version,
            &mut state,
            |event, _offset| match event {
                FrameEvent::Intra(frame) | FrameEvent::Predicted(frame) => {
                    let mut row = frame;
                    row.extend(last_slow.iter().copied());
                    chunk.frames.push(row);
                }
                FrameEvent::Slow(frame) => {
                    last_slow = frame;
                }
                FrameEvent::Event(record) => {
                    if matches!(record.kind, EventKind::LoggingResume { .. }) && !chunk.frames.is_empty() {
                        chunk.gap_starts_here.insert(chunk.frames.len() - 1);
                    }
                    pending_events.push((record.kind, chunk.frames.len()));
                }
                FrameEvent::Invalid { .. } => {
                    if !chunk.frames.is_empty() {
                        chunk.gap_starts_here.insert(chunk.frames.len() - 1);
                    }
                }
            },
        );

        for (kind, at_index) in pending_events {
            let time = if at_index < chunk.frames.len() {
                chunk.frames[at_index][time_index] as i64
            } else {
                chunk
                    .frames
                    .last()
                    .map(|f| f[time_index] as i64)
                    .unwrap_or(0)
            };
            chunk.events.push(EventOccurrence { kind, time });
        }

        let num_motors = self.current.as_ref().map(|c| c.num_motors).unwrap_or(0);
        let sys_config = self.directories[log_index].sys_config.clone();
        let i_def = self.directories[log_index].i_def.clone();
        for row in &mut chunk.frames {
            inject_computed_fields(&sys_config, &i_def, num_motors, row);
        }

        self.chunk_cache.insert(chunk_index, chunk.clone());
        Ok(chunk)
    }

    /// Within the chunk containing `t`, finds the smallest frame index
    /// strictly greater than `t` and returns `(previous, current, next)`
    /// offsets into that chunk's `frames`.
    pub fn get_frame_at_time(&mut self, t: i64) -> Result<(usize, usize, usize), DecodeError> {
        let index = self
            .current
            .as_ref()
            .ok_or(DecodeError::LogNotFound(usize::MAX))?
            .index;
        let times = self.directories[index].times.clone();
        let c = binary_search_or_previous(&times, t);
        let chunk = self.decode_chunk(index, c)?;
        let time_index = self.directories[index].i_def.index_of("time").unwrap_or(1);

        let mut next = chunk.frames.len();
        for (i, frame) in chunk.frames.iter().enumerate() {
            if frame[time_index] as i64 > t {
                next = i;
                break;
            }
        }
        let current_idx = next.saturating_sub(1);
        let previous_idx = current_idx.saturating_sub(1);
        Ok((previous_idx, current_idx, next.min(chunk.frames.len().saturating_sub(1))))
    }
}

pub struct MergedStats {
    pub raw: DecodeStats,
    pub field: Vec<FieldStat>,
}

fn build_field_names(dir: &SubLogDirectory) -> Vec<String> {
    let mut names = dir.i_def.name.clone();
    names.extend(dir.s_def.name.iter().cloned());

    let has = |n: &str| dir.i_def.index_of(n).is_some();

    if (0..3).any(|axis| has(&format!("axisP[{axis}]"))) {
        for axis in 0..3 {
            names.push(format!("pidSum[{axis}]"));
        }
    }
    let scaled_rc_present = (0..4).any(|axis| {
        has(&format!("setpoint[{axis}]")) || has(&format!("rcCommand[{axis}]"))
    });
    if scaled_rc_present {
        for axis in 0..4 {
            names.push(format!("scaledRcCommand[{axis}]"));
        }
    }
    if scaled_rc_present && (0..3).any(|axis| has(&format!("gyroADC[{axis}]"))) {
        for axis in 0..3 {
            names.push(format!("axisError[{axis}]"));
        }
    }
    let num_motors = (0..8).filter(|k| has(&format!("motor[{k}]"))).count();
    for k in 0..num_motors {
        names.push(format!("motorLegacy[{k}]"));
    }

    names.truncate(names.len().min(dir.i_def.count + dir.s_def.count + ADDITIONAL_COMPUTED_FIELD_COUNT));
    names
}

fn estimate_cell_count(dir: &SubLogDirectory) -> usize {
    if dir.sys_config.vbatmaxcellvoltage == 0 {
        return 1;
    }
    for k in 1..=8i64 {
        if dir.sys_config.vbatref < k * dir.sys_config.vbatmaxcellvoltage {
            return k as usize;
        }
    }
    8
}

/// Appends PID sum, scaled RC, PID error, and legacy motor duplicate
/// fields to `row`, skipping any family whose source fields are absent
/// entirely. Mirrors [`build_field_names`]'s family presence checks.
fn inject_computed_fields(sys_config: &SysConfig, i_def: &FrameDef, num_motors: usize, row: &mut Vec<i32>) {
    let get = |row: &[i32], name: &str| -> Option<i32> { i_def.index_of(name).map(|i| row[i]) };

    let pid_sum_present = (0..3).any(|axis| get(row, &format!("axisP[{axis}]")).is_some());
    let mut scaled_rc = [0i32; 4];
    let scaled_rc_present = (0..4)
        .any(|axis| get(row, &format!("setpoint[{axis}]")).is_some() || get(row, &format!("rcCommand[{axis}]")).is_some());

    if pid_sum_present {
        for axis in 0..3 {
            let p = get(row, &format!("axisP[{axis}]")).unwrap_or(0);
            let i = get(row, &format!("axisI[{axis}]")).unwrap_or(0);
            let d = get(row, &format!("axisD[{axis}]")).unwrap_or(0);
            let f = get(row, &format!("axisF[{axis}]")).unwrap_or(0);
            let mut sum = p + i + d + f;
            let limit = if axis == 2 {
                sys_config.pid_sum_limit_yaw
            } else {
                sys_config.pid_sum_limit
            };
            if limit > 0 {
                sum = sum.clamp(-(limit as i32), limit as i32);
            }
            row.push(sum);
        }
    }

    if scaled_rc_present {
        let bf_v4 = sys_config.firmware_at_least(crate::config::FirmwareType::Betaflight, (4, 0, 0));
        for axis in 0..4 {
            let value = if bf_v4 {
                let setpoint = get(row, &format!("setpoint[{axis}]")).unwrap_or(0);
                if axis == 3 {
                    setpoint / 10
                } else {
                    setpoint
                }
            } else if axis < 3 {
                let rc = get(row, &format!("rcCommand[{axis}]")).unwrap_or(0) as f64;
                rc_command_raw_to_deg_per_sec(sys_config, rc, axis).round() as i32
            } else {
                get(row, "rcCommand[3]").unwrap_or(0)
            };
            scaled_rc[axis] = value;
            row.push(value);
        }
    }

    if scaled_rc_present && (0..3).any(|axis| get(row, &format!("gyroADC[{axis}]")).is_some()) {
        for axis in 0..3 {
            let gyro = get(row, &format!("gyroADC[{axis}]")).unwrap_or(0);
            let gyro_deg = gyro_raw_to_deg_per_sec(sys_config, gyro);
            let error = scaled_rc[axis] as f64 - gyro_deg;
            row.push(error.round() as i32);
        }
    }

    for k in 0..num_motors {
        if let Some(v) = get(row, &format!("motor[{k}]")) {
            row.push(v);
        }
    }
}

fn binary_search_or_previous(values: &[i64], target: i64) -> usize {
    match values.binary_search(&target) {
        Ok(i) => i,
        Err(0) => 0,
        Err(i) => i - 1,
    }
}

fn binary_search_or_next(values: &[i64], target: i64) -> usize {
    match values.binary_search(&target) {
        Ok(i) => i,
        Err(i) => i.min(values.len().saturating_sub(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_search_or_previous_clamps_to_zero() {
        let values = [10, 20, 30];
        assert_eq!(binary_search_or_previous(&values, 5), 0);
        assert_eq!(binary_search_or_previous(&values, 25), 1);
        assert_eq!(binary_search_or_previous(&values, 30), 2);
    }

    #[test]
    fn binary_search_or_next_clamps_to_last() {
        let values = [10, 20, 30];
        assert_eq!(binary_search_or_next(&values, 5), 0);
        assert_eq!(binary_search_or_next(&values, 25), 2);
        assert_eq!(binary_search_or_next(&values, 100), 2);
    }

    fn synthetic_log() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(crate::index::SUB_LOG_START_MARKER);
        data.extend_from_slice(b"H I interval:32\n");
        data.extend_from_slice(b"H P interval:1/8\n");
        data.extend_from_slice(b"H Field I name:loopIteration,time,motor[0]\n");
        data.extend_from_slice(b"H Field I signed:0,0,0\n");
        data.extend_from_slice(b"H Field I predictor:0,0,0\n");
        data.extend_from_slice(b"H Field I encoding:1,1,1\n");
        data.extend_from_slice(b"H Field P predictor:1,1,1\n");
        data.extend_from_slice(b"H Field P encoding:0,0,0\n");
        data.push(b'I');
        data.push(0);
        data.push(10);
        data.push(100);
        data
    }

    #[test]
    fn open_log_and_get_min_max_time() {
        let mut log = LogFile::open(synthetic_log());
        assert_eq!(log.get_log_count(), 1);
        log.open_log(0).expect("open should succeed");
        assert_eq!(log.get_min_time(), Some(10));
        assert_eq!(log.get_max_time(), Some(10));
    }

    #[test]
    fn chunk_rows_include_motor_legacy_duplicate() {
        let mut log = LogFile::open(synthetic_log());
        log.open_log(0).unwrap();
        let chunks = log.get_chunks_in_time_range(0, 100).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].frames.len(), 1);
        // loopIteration, time, motor[0], then motorLegacy[0].
        assert_eq!(*chunks[0].frames[0].last().unwrap(), 100);
    }
}
