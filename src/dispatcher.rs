// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame dispatcher and validator: reads one marker byte at a time,
//! invokes the frame codec, decides post-hoc whether the previous frame
//! was well-formed, and drives resynchronization after corruption.
//!
//! Modeled as an iterator-style pass over the byte stream producing
//! [`FrameEvent`] records rather than a callback installed on the parser,
//! per the design note preferring that shape over a mutating hook: the
//! indexer and the facade's chunk decoder each drive their own pass over
//! the same kind of stream.

use std::collections::HashMap;

use tracing::debug;

use crate::codec::{decode_frame, DecodeContext};
use crate::config::SysConfig;
use crate::frame_def::{FrameDef, FrameKind};
use crate::stream::ByteStream;

const MAX_FRAME_LEN: usize = 256;
const MAX_ITERATION_JUMP: i64 = 5000;
const MAX_TIME_JUMP_US: i64 = 10_000_000;

const EVENT_SYNC_BEEP: u8 = 0;
const EVENT_LOGGING_RESUME: u8 = 14;
const EVENT_FLIGHT_MODE: u8 = 30;
const EVENT_DISARM: u8 = 40;
const EVENT_LOG_END: u8 = 255;
const LOG_END_PAYLOAD: &[u8] = b"End of log\0";

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum EventKind {
    SyncBeep { time: u32 },
    FlightMode { new_flags: u32, last_flags: u32 },
    Disarm { reason: u32 },
    LoggingResume { log_iteration: u32, current_time: u32 },
    LogEnd,
    /// Event kinds outside the five payload shapes this decoder knows;
    /// preserved so event continuity (and the stream's byte accounting)
    /// isn't broken by events this spec doesn't name in detail.
    Unknown { code: u8 },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EventRecord {
    pub kind: EventKind,
    /// Events lack an intrinsic timestamp; filled in by the facade from
    /// the next main frame's time (or the sub-log's last frame).
    pub time: Option<i64>,
}

/// One decoded unit produced by a pass over the frame stream.
#[derive(Debug, Clone)]
pub enum FrameEvent {
    Intra(Vec<i32>),
    Predicted(Vec<i32>),
    Slow(Vec<i32>),
    Event(EventRecord),
    /// A frame that failed validation; `marker` is the byte that started
    /// it (0 if the failure was detected only at EOF).
    Invalid { marker: u8 },
}

/// Three-slot ring over main-frame history, addressed as current/
/// previous/previous-previous via a rotating cursor rather than
/// reference juggling.
pub struct MainHistory {
    slots: [Vec<i32>; 3],
    cursor: usize,
    have_main: bool,
}

impl MainHistory {
    pub fn new(count: usize) -> Self {
        Self {
            slots: [vec![0; count], vec![0; count], vec![0; count]],
            cursor: 0,
            have_main: false,
        }
    }

    pub fn previous(&self) -> Option<&[i32]> {
        self.have_main.then(|| self.slots[(self.cursor + 2) % 3].as_slice())
    }

    pub fn previous_previous(&self) -> Option<&[i32]> {
        self.have_main.then(|| self.slots[(self.cursor + 1) % 3].as_slice())
    }

    /// On an I-frame, both look-back slots collapse to the new frame —
    /// there is no meaningful look-back across an I boundary.
    pub fn commit_intra(&mut self, frame: Vec<i32>) {
        self.cursor = (self.cursor + 1) % 3;
        let other1 = (self.cursor + 1) % 3;
        let other2 = (self.cursor + 2) % 3;
        self.slots[other1] = frame.clone();
        self.slots[other2] = frame.clone();
        self.slots[self.cursor] = frame;
        self.have_main = true;
    }

    pub fn commit_predicted(&mut self, frame: Vec<i32>) {
        self.cursor = (self.cursor + 1) % 3;
        self.slots[self.cursor] = frame;
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FieldStat {
    pub min: i64,
    pub max: i64,
    pub seen: bool,
}

impl FieldStat {
    fn observe(&mut self, value: i64) {
        if !self.seen || value < self.min {
            self.min = value;
        }
        if !self.seen || value > self.max {
            self.max = value;
        }
        self.seen = true;
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FrameTypeStats {
    pub bytes: u64,
    pub valid_count: u64,
    pub corrupt_count: u64,
    pub size_count: HashMap<usize, u64>,
}

impl FrameTypeStats {
    fn record_valid(&mut self, len: usize) {
        self.bytes += len as u64;
        self.valid_count += 1;
        *self.size_count.entry(len).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DecodeStats {
    pub intra: FrameTypeStats,
    pub predicted: FrameTypeStats,
    pub slow: FrameTypeStats,
    pub event: FrameTypeStats,
    pub total_corrupted_frames: u64,
    pub intentionally_absent_iterations: u64,
    pub main_field: Vec<FieldStat>,
    pub slow_field: Vec<FieldStat>,
}

/// Mutable state carried across one pass over a sub-log's frame stream.
pub struct DispatcherState {
    pub main_stream_is_valid: bool,
    pub last_main_frame_iteration: i64,
    pub last_main_frame_time: i64,
    pub last_skipped_frames: i64,
    pub last_slow: Vec<i32>,
    pub history: MainHistory,
    pub stats: DecodeStats,
    iteration_index: usize,
    time_index: usize,
}

impl DispatcherState {
    pub fn new(i_def: &FrameDef, s_count: usize) -> Self {
        Self {
            main_stream_is_valid: true,
            last_main_frame_iteration: -1,
            last_main_frame_time: -1,
            last_skipped_frames: 0,
            last_slow: vec![0; s_count],
            history: MainHistory::new(i_def.count),
            stats: DecodeStats {
                main_field: vec![FieldStat::default(); i_def.count],
                slow_field: vec![FieldStat::default(); s_count],
                ..Default::default()
            },
            iteration_index: i_def.index_of("loopIteration").unwrap_or(0),
            time_index: i_def.index_of("time").unwrap_or(1),
        }
    }
}

fn is_known_marker(b: u8) -> bool {
    matches!(b, b'I' | b'P' | b'S' | b'E' | b'G' | b'H')
}

/// `k` is a logged (non-skipped) iteration iff
/// `((k mod I_interval) + P_num - 1) mod P_denom < P_num`.
fn is_logged_iteration(k: i64, i_interval: i64, p_num: i64, p_denom: i64) -> bool {
    if i_interval <= 0 || p_denom <= 0 {
        return true;
    }
    (((k % i_interval) + p_num - 1).rem_euclid(p_denom)) < p_num
}

/// Counts how many iterations between `last_iter` and the next
/// would-be-logged iteration were intentionally skipped by the sampling
/// rate.
fn count_skipped(last_iter: i64, i_interval: i64, p_num: i64, p_denom: i64) -> i64 {
    let mut k = last_iter + 1;
    let mut skipped = 0;
    while !is_logged_iteration(k, i_interval, p_num, p_denom) {
        skipped += 1;
        k += 1;
    }
    skipped
}

enum PendingPayload {
    Intra(Vec<i32>),
    Predicted(Vec<i32>),
    Slow(Vec<i32>),
    Event(EventKind),
}

struct Pending {
    marker: u8,
    frame_start: usize,
    byte_len: usize,
    payload: PendingPayload,
}

/// Runs one full pass over `stream`, emitting a [`FrameEvent`] per
/// decoded or rejected frame via `callback`. `callback` additionally
/// receives the byte offset the frame (or corruption) started at, which
/// callers use to build a sub-log index or gap markers.
pub fn run_frames<F: FnMut(FrameEvent, usize)>(
    stream: &mut ByteStream,
    frame_defs: &HashMap<FrameKind, FrameDef>,
    sys_config: &SysConfig,
    data_version: i32,
    state: &mut DispatcherState,
    mut callback: F,
) {
    let i_def = frame_defs.get(&FrameKind::Intra);
    let p_def = frame_defs.get(&FrameKind::Predicted);
    let s_def = frame_defs.get(&FrameKind::Slow);
    let Some(i_def) = i_def else { return };
    let Some(p_def) = p_def else { return };

    let mut pending: Option<Pending> = None;

    loop {
        if stream.is_eof() {
            if let Some(p) = pending.take() {
                let accepted = p.byte_len <= MAX_FRAME_LEN;
                finalize(p, accepted, stream, state, &mut callback);
            }
            break;
        }

        let frame_start = stream.pos;
        let marker = stream.read_byte();
        let marker = if marker < 0 { break } else { marker as u8 };

        if let Some(p) = pending.take() {
            let accepted = p.byte_len <= MAX_FRAME_LEN && is_known_marker(marker);
            if accepted {
                finalize(p, true, stream, state, &mut callback);
            } else {
                state.main_stream_is_valid = false;
                state.stats.total_corrupted_frames += 1;
                debug!(frame_start = p.frame_start, marker = p.marker as char as u32, "corrupt frame, resynchronizing");
                callback(FrameEvent::Invalid { marker: p.marker }, p.frame_start);
                stream.pos = p.frame_start + 1;
                continue;
            }
        }

        if !is_known_marker(marker) {
            continue;
        }

        match marker {
            b'I' => {
                let ctx = DecodeContext {
                    previous: state.history.previous(),
                    previous_previous: None,
                    sys_config,
                    data_version,
                    skipped_frames: 0,
                    last_main_frame_time: state.last_main_frame_time as i32,
                };
                match decode_frame(i_def, stream, &ctx) {
                    Ok(frame) => {
                        pending = Some(Pending {
                            marker,
                            frame_start,
                            byte_len: stream.pos - frame_start,
                            payload: PendingPayload::Intra(frame),
                        });
                    }
                    Err(_) => break,
                }
            }
            b'P' => {
                let skipped = count_skipped(
                    state.last_main_frame_iteration,
                    sys_config.frame_interval_i,
                    sys_config.p_num,
                    sys_config.p_denom,
                );
                state.last_skipped_frames = skipped;
                let ctx = DecodeContext {
                    previous: state.history.previous(),
                    previous_previous: state.history.previous_previous(),
                    sys_config,
                    data_version,
                    skipped_frames: skipped as i32,
                    last_main_frame_time: state.last_main_frame_time as i32,
                };
                match decode_frame(p_def, stream, &ctx) {
                    Ok(frame) => {
                        pending = Some(Pending {
                            marker,
                            frame_start,
                            byte_len: stream.pos - frame_start,
                            payload: PendingPayload::Predicted(frame),
                        });
                    }
                    Err(_) => break,
                }
            }
            b'S' => {
                if let Some(s_def) = s_def {
                    let ctx = DecodeContext {
                        previous: None,
                        previous_previous: None,
                        sys_config,
                        data_version,
                        skipped_frames: 0,
                        last_main_frame_time: state.last_main_frame_time as i32,
                    };
                    match decode_frame(s_def, stream, &ctx) {
                        Ok(frame) => {
                            pending = Some(Pending {
                                marker,
                                frame_start,
                                byte_len: stream.pos - frame_start,
                                payload: PendingPayload::Slow(frame),
                            });
                        }
                        Err(_) => break,
                    }
                } else {
                    pending = None;
                }
            }
            b'E' => {
                if let Some(kind) = parse_event(stream) {
                    pending = Some(Pending {
                        marker,
                        frame_start,
                        byte_len: stream.pos - frame_start,
                        payload: PendingPayload::Event(kind),
                    });
                } else {
                    pending = None;
                }
            }
            b'G' | b'H' => {
                // GPS frames: no field definitions are specified for this
                // decoder (out of scope beyond event continuity). Skip
                // forward to the next recognized marker so the main
                // stream's resynchronization logic isn't fooled by bytes
                // we have no way to decode.
                skip_unknown_frame(stream);
                pending = None;
            }
            _ => unreachable!("is_known_marker guards this match"),
        }
    }
}

fn skip_unknown_frame(stream: &mut ByteStream) {
    while !stream.is_eof() {
        let b = stream.peek_char();
        if b < 0 || is_known_marker(b as u8) {
            break;
        }
        stream.read_byte();
    }
}

fn parse_event(stream: &mut ByteStream) -> Option<EventKind> {
    let code = stream.read_byte();
    if code < 0 {
        return None;
    }
    let code = code as u8;
    Some(match code {
        EVENT_SYNC_BEEP => EventKind::SyncBeep {
            time: stream.read_unsigned_vb(),
        },
        EVENT_FLIGHT_MODE => EventKind::FlightMode {
            new_flags: stream.read_unsigned_vb(),
            last_flags: stream.read_unsigned_vb(),
        },
        EVENT_DISARM => EventKind::Disarm {
            reason: stream.read_unsigned_vb(),
        },
        EVENT_LOGGING_RESUME => EventKind::LoggingResume {
            log_iteration: stream.read_unsigned_vb(),
            current_time: stream.read_unsigned_vb(),
        },
        EVENT_LOG_END => {
            let payload = stream.read_string(LOG_END_PAYLOAD.len());
            if payload.as_bytes() == LOG_END_PAYLOAD {
                EventKind::LogEnd
            } else {
                // False-positive marker: discard rather than emit.
                return None;
            }
        }
        other => EventKind::Unknown { code: other },
    })
}

fn finalize<F: FnMut(FrameEvent, usize)>(
    p: Pending,
    generically_accepted: bool,
    stream: &mut ByteStream,
    state: &mut DispatcherState,
    callback: &mut F,
) {
    if !generically_accepted {
        state.main_stream_is_valid = false;
        state.stats.total_corrupted_frames += 1;
        callback(FrameEvent::Invalid { marker: p.marker }, p.frame_start);
        return;
    }

    match p.payload {
        PendingPayload::Intra(frame) => {
            let iter = frame[state.iteration_index] as i64;
            let time = frame[state.time_index] as i64;
            let ok = state.last_main_frame_iteration == -1
                || (iter >= state.last_main_frame_iteration
                    && time >= state.last_main_frame_time
                    && iter - state.last_main_frame_iteration <= MAX_ITERATION_JUMP
                    && time - state.last_main_frame_time <= MAX_TIME_JUMP_US);
            if ok {
                observe_main_fields(&mut state.stats.main_field, &frame);
                state.history.commit_intra(frame.clone());
                state.last_main_frame_iteration = iter;
                state.last_main_frame_time = time;
                state.main_stream_is_valid = true;
                state.stats.intra.record_valid(p.byte_len);
                callback(FrameEvent::Intra(frame), p.frame_start);
            } else {
                state.main_stream_is_valid = false;
                callback(FrameEvent::Invalid { marker: p.marker }, p.frame_start);
            }
        }
        PendingPayload::Predicted(frame) => {
            let iter = frame[state.iteration_index] as i64;
            let time = frame[state.time_index] as i64;
            let ok = state.main_stream_is_valid
                && (iter >= state.last_main_frame_iteration
                    && time >= state.last_main_frame_time
                    && iter - state.last_main_frame_iteration <= MAX_ITERATION_JUMP
                    && time - state.last_main_frame_time <= MAX_TIME_JUMP_US);
            if ok {
                observe_main_fields(&mut state.stats.main_field, &frame);
                state.history.commit_predicted(frame.clone());
                state.last_main_frame_iteration = iter;
                state.last_main_frame_time = time;
                state.stats.intentionally_absent_iterations += state.last_skipped_frames as u64;
                state.stats.predicted.record_valid(p.byte_len);
                callback(FrameEvent::Predicted(frame), p.frame_start);
            } else {
                state.main_stream_is_valid = false;
                callback(FrameEvent::Invalid { marker: p.marker }, p.frame_start);
            }
        }
        PendingPayload::Slow(frame) => {
            observe_main_fields(&mut state.stats.slow_field, &frame);
            state.last_slow = frame.clone();
            state.stats.slow.record_valid(p.byte_len);
            callback(FrameEvent::Slow(frame), p.frame_start);
        }
        PendingPayload::Event(kind) => {
            if let EventKind::LoggingResume {
                log_iteration,
                current_time,
            } = &kind
            {
                state.last_main_frame_iteration = *log_iteration as i64;
                state.last_main_frame_time = *current_time as i64;
            }
            let terminates = matches!(kind, EventKind::LogEnd);
            state.stats.event.record_valid(p.byte_len);
            callback(FrameEvent::Event(EventRecord { kind, time: None }), p.frame_start);
            if terminates {
                // Truncate to just past the validated "End of log\0"
                // payload, discarding whatever marker byte was read to
                // validate this event (it may be past the true end).
                stream.end = p.frame_start + p.byte_len;
            }
        }
    }
}

fn observe_main_fields(stats: &mut [FieldStat], frame: &[i32]) {
    for (slot, value) in stats.iter_mut().zip(frame.iter()) {
        slot.observe(*value as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_iteration_matches_skip_formula() {
        assert!(is_logged_iteration(0, 32, 1, 8));
        assert!(!is_logged_iteration(1, 32, 1, 8));
        assert_eq!(count_skipped(0, 32, 1, 8), 7);
    }

    #[test]
    fn history_collapses_previous_slots_on_intra() {
        let mut history = MainHistory::new(2);
        assert!(history.previous().is_none());
        history.commit_intra(vec![1, 2]);
        assert_eq!(history.previous(), Some([1, 2].as_slice()));
        assert_eq!(history.previous_previous(), Some([1, 2].as_slice()));
    }

    #[test]
    fn history_rotates_on_predicted_commit() {
        let mut history = MainHistory::new(1);
        history.commit_intra(vec![10]);
        history.commit_predicted(vec![11]);
        assert_eq!(history.previous(), Some([11].as_slice()));
        assert_eq!(history.previous_previous(), Some([10].as_slice()));
        history.commit_predicted(vec![12]);
        assert_eq!(history.previous(), Some([12].as_slice()));
        assert_eq!(history.previous_previous(), Some([11].as_slice()));
    }

    #[test]
    fn parse_event_discards_false_positive_log_end() {
        let mut data = vec![EVENT_LOG_END];
        data.extend_from_slice(b"Not a real end");
        let mut stream = ByteStream::new(&data, 0, data.len());
        assert!(parse_event(&mut stream).is_none());
    }

    #[test]
    fn parse_event_accepts_real_log_end_marker() {
        let mut data = vec![EVENT_LOG_END];
        data.extend_from_slice(LOG_END_PAYLOAD);
        let mut stream = ByteStream::new(&data, 0, data.len());
        assert_eq!(parse_event(&mut stream), Some(EventKind::LogEnd));
    }
}
