// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame codec: reconstructs one frame's integer field vector from its
//! [`FrameDef`], the raw byte stream, and up to two historical frames.
//!
//! Encodings and predictors are implemented as exhaustive tagged
//! variants (`EncodingCode`/`PredictorCode`) rather than integer-indexed
//! jump tables, per the design note that version-gated cases should be
//! checked at compile time.

use crate::config::SysConfig;
use crate::error::FrameError;
use crate::frame_def::FrameDef;
use crate::stream::{sign_extend, ByteStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingCode {
    SignedVb,
    UnsignedVb,
    Neg14Bit,
    Tag8_8Svb,
    Tag2_3S32,
    Tag8_4S16,
    Null,
    Tag2_3SVariable,
}

impl EncodingCode {
    fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(EncodingCode::SignedVb),
            1 => Some(EncodingCode::UnsignedVb),
            3 => Some(EncodingCode::Neg14Bit),
            6 => Some(EncodingCode::Tag8_8Svb),
            7 => Some(EncodingCode::Tag2_3S32),
            8 => Some(EncodingCode::Tag8_4S16),
            9 => Some(EncodingCode::Null),
            10 => Some(EncodingCode::Tag2_3SVariable),
            _ => None,
        }
    }

    /// Number of fields this code's group spans (1 for scalar codes).
    fn group_size(self) -> usize {
        match self {
            EncodingCode::Tag2_3S32 | EncodingCode::Tag2_3SVariable => 3,
            EncodingCode::Tag8_4S16 => 4,
            EncodingCode::Tag8_8Svb => 8,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorCode {
    Zero,
    Previous,
    StraightLine,
    Average2,
    Motor0,
    Inc,
    The1500,
    VbatRef,
    LastMainFrameTime,
    MinMotor,
}

impl PredictorCode {
    fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(PredictorCode::Zero),
            1 => Some(PredictorCode::Previous),
            2 => Some(PredictorCode::StraightLine),
            3 => Some(PredictorCode::Average2),
            5 => Some(PredictorCode::Motor0),
            6 => Some(PredictorCode::Inc),
            8 => Some(PredictorCode::The1500),
            9 => Some(PredictorCode::VbatRef),
            10 => Some(PredictorCode::LastMainFrameTime),
            11 => Some(PredictorCode::MinMotor),
            _ => None,
        }
    }
}

/// Truncates `(a + b) / 2` toward zero, C-style, matching the source
/// format's `AVERAGE_2` arithmetic (not floor division).
fn trunc_avg2(a: i32, b: i32) -> i32 {
    let sum = a as i64 + b as i64;
    (sum / 2) as i32
}

pub struct DecodeContext<'a> {
    pub previous: Option<&'a [i32]>,
    pub previous_previous: Option<&'a [i32]>,
    pub sys_config: &'a SysConfig,
    pub data_version: i32,
    pub skipped_frames: i32,
    pub last_main_frame_time: i32,
}

/// Decodes one frame's field vector. `out` must already be sized to
/// `def.count` (filled with zeroes); fields are written in order.
pub fn decode_frame(
    def: &FrameDef,
    stream: &mut ByteStream,
    ctx: &DecodeContext,
) -> Result<Vec<i32>, FrameError> {
    let mut out = vec![0i32; def.count];
    let motor0_index = def.index_of("motor[0]");
    let time_index = def.index_of("time");

    let mut i = 0usize;
    while i < def.count {
        let predictor_code = def.predictor.get(i).copied().unwrap_or(0);
        let predictor = PredictorCode::from_u8(predictor_code)
            .ok_or(FrameError::UnknownPredictor { field: i, code: predictor_code })?;

        if predictor == PredictorCode::Inc {
            // No raw read: value is derived entirely from skip-count state.
            let prev = ctx.previous.map(|p| p[i]).unwrap_or(0);
            out[i] = ctx.skipped_frames + 1 + prev;
            i += 1;
            continue;
        }

        let encoding_code = def.encoding.get(i).copied().unwrap_or(0);
        let encoding = EncodingCode::from_u8(encoding_code)
            .ok_or(FrameError::UnknownEncoding { field: i, code: encoding_code })?;

        match encoding {
            EncodingCode::SignedVb => {
                let raw = stream.read_signed_vb();
                out[i] = apply_predictor(raw, predictor, i, &out, motor0_index, time_index, ctx)?;
                i += 1;
            }
            EncodingCode::UnsignedVb => {
                let raw = stream.read_unsigned_vb() as i32;
                out[i] = apply_predictor(raw, predictor, i, &out, motor0_index, time_index, ctx)?;
                i += 1;
            }
            EncodingCode::Neg14Bit => {
                let vb = stream.read_unsigned_vb();
                let raw = -sign_extend(vb & 0x3FFF, 14);
                out[i] = apply_predictor(raw, predictor, i, &out, motor0_index, time_index, ctx)?;
                i += 1;
            }
            EncodingCode::Null => {
                out[i] = apply_predictor(0, predictor, i, &out, motor0_index, time_index, ctx)?;
                i += 1;
            }
            EncodingCode::Tag2_3S32 => {
                let run = group_run(def, i, encoding_code, encoding.group_size());
                let mut raw = [0i32; 3];
                stream.read_tag2_3s32(&mut raw);
                apply_group(&mut out, &raw, i, run, def, motor0_index, time_index, ctx)?;
                i += run;
            }
            EncodingCode::Tag2_3SVariable => {
                let run = group_run(def, i, encoding_code, encoding.group_size());
                let mut raw = [0i32; 3];
                stream.read_tag2_3s_variable(&mut raw);
                apply_group(&mut out, &raw, i, run, def, motor0_index, time_index, ctx)?;
                i += run;
            }
            EncodingCode::Tag8_4S16 => {
                let run = group_run(def, i, encoding_code, encoding.group_size());
                let mut raw = [0i32; 4];
                if ctx.data_version < 2 {
                    stream.read_tag8_4s16_v1(&mut raw);
                } else {
                    stream.read_tag8_4s16_v2(&mut raw);
                }
                apply_group(&mut out, &raw, i, run, def, motor0_index, time_index, ctx)?;
                i += run;
            }
            EncodingCode::Tag8_8Svb => {
                let run = group_run(def, i, encoding_code, encoding.group_size());
                let mut raw = [0i32; 8];
                stream.read_tag8_8svb(&mut raw, run);
                apply_group(&mut out[..], &raw[..run], i, run, def, motor0_index, time_index, ctx)?;
                i += run;
            }
        }
    }

    Ok(out)
}

/// Group encodings span the run of consecutive fields sharing the same
/// encoding code, capped at that encoding's maximum group size.
fn group_run(def: &FrameDef, start: usize, code: u8, max: usize) -> usize {
    let mut len = 0;
    while len < max
        && start + len < def.count
        && def.encoding.get(start + len).copied().unwrap_or(255) == code
    {
        len += 1;
    }
    len.max(1)
}

fn apply_group(
    out: &mut [i32],
    raw: &[i32],
    start: usize,
    run: usize,
    def: &FrameDef,
    motor0_index: Option<usize>,
    time_index: Option<usize>,
    ctx: &DecodeContext,
) -> Result<(), FrameError> {
    for k in 0..run {
        let field = start + k;
        let predictor_code = def.predictor.get(field).copied().unwrap_or(0);
        let predictor = PredictorCode::from_u8(predictor_code)
            .ok_or(FrameError::UnknownPredictor { field, code: predictor_code })?;
        out[field] = apply_predictor(raw[k], predictor, field, out, motor0_index, time_index, ctx)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_predictor(
    raw: i32,
    predictor: PredictorCode,
    field: usize,
    out_so_far: &[i32],
    motor0_index: Option<usize>,
    time_index: Option<usize>,
    ctx: &DecodeContext,
) -> Result<i32, FrameError> {
    let value = match predictor {
        PredictorCode::Zero => raw,
        PredictorCode::Previous => raw + ctx.previous.map(|p| p[field]).unwrap_or(0),
        PredictorCode::StraightLine => {
            let prev = ctx.previous.map(|p| p[field]).unwrap_or(0);
            let prev2 = ctx.previous_previous.map(|p| p[field]).unwrap_or(0);
            raw + 2 * prev - prev2
        }
        PredictorCode::Average2 => {
            let prev = ctx.previous.map(|p| p[field]).unwrap_or(0);
            let prev2 = ctx.previous_previous.map(|p| p[field]).unwrap_or(0);
            raw + trunc_avg2(prev, prev2)
        }
        PredictorCode::Motor0 => {
            let idx = motor0_index.ok_or(FrameError::MissingPredictorInput { field })?;
            if idx >= field {
                return Err(FrameError::MissingPredictorInput { field });
            }
            raw + out_so_far[idx]
        }
        PredictorCode::Inc => unreachable!("INC is handled before raw read"),
        PredictorCode::The1500 => raw + 1500,
        PredictorCode::VbatRef => raw + ctx.sys_config.vbatref as i32,
        PredictorCode::LastMainFrameTime => {
            let _ = time_index;
            raw + ctx.last_main_frame_time
        }
        PredictorCode::MinMotor => raw + ctx.sys_config.motor_output[0] as i32,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_def::FrameDef;

    fn ctx(sys_config: &SysConfig) -> DecodeContext<'_> {
        DecodeContext {
            previous: None,
            previous_previous: None,
            sys_config,
            data_version: 2,
            skipped_frames: 0,
            last_main_frame_time: 0,
        }
    }

    #[test]
    fn zero_predictor_passes_raw_value_through() {
        let mut def = FrameDef::default();
        def.set_names(&["a".to_string()]);
        def.set_predictor(&[0]);
        def.set_encoding(&[0]);
        let data = [0x0Au8]; // zigzag(5) = 10
        let mut stream = ByteStream::new(&data, 0, 1);
        let cfg = SysConfig::default();
        let out = decode_frame(&def, &mut stream, &ctx(&cfg)).unwrap();
        assert_eq!(out[0], 5);
    }

    #[test]
    fn inc_predictor_consumes_no_bytes() {
        let mut def = FrameDef::default();
        def.set_names(&["loopIteration".to_string()]);
        def.set_predictor(&[6]);
        def.set_encoding(&[1]);
        let data: [u8; 0] = [];
        let mut stream = ByteStream::new(&data, 0, 0);
        let cfg = SysConfig::default();
        let mut c = ctx(&cfg);
        c.skipped_frames = 2;
        let out = decode_frame(&def, &mut stream, &c).unwrap();
        assert_eq!(out[0], 3);
    }

    #[test]
    fn motor0_predictor_requires_motor0_decoded_first() {
        let mut def = FrameDef::default();
        def.set_names(&["motorDelta".to_string(), "motor[0]".to_string()]);
        def.set_predictor(&[5, 0]);
        def.set_encoding(&[0, 0]);
        let data = [0x00u8, 0x00];
        let mut stream = ByteStream::new(&data, 0, 2);
        let cfg = SysConfig::default();
        let err = decode_frame(&def, &mut stream, &ctx(&cfg)).unwrap_err();
        assert!(matches!(err, FrameError::MissingPredictorInput { field: 0 }));
    }

    #[test]
    fn motor0_predictor_succeeds_when_decoded_first() {
        let mut def = FrameDef::default();
        def.set_names(&["motor[0]".to_string(), "motorDelta".to_string()]);
        def.set_predictor(&[0, 5]);
        def.set_encoding(&[1, 1]);
        let data = [10u8, 3u8];
        let mut stream = ByteStream::new(&data, 0, 2);
        let cfg = SysConfig::default();
        let out = decode_frame(&def, &mut stream, &ctx(&cfg)).unwrap();
        assert_eq!(out[0], 10);
        assert_eq!(out[1], 13);
    }

    #[test]
    fn average2_truncates_toward_zero() {
        assert_eq!(trunc_avg2(-3, 0), 0);
        assert_eq!(trunc_avg2(3, 0), 1);
        assert_eq!(trunc_avg2(-1, -2), -1);
    }

    #[test]
    fn tag8_4s16_group_advances_by_four_fields() {
        let mut def = FrameDef::default();
        def.set_names(&[
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "d".to_string(),
        ]);
        def.set_predictor(&[0, 0, 0, 0]);
        def.set_encoding(&[8, 8, 8, 8]);
        // selector byte: all widths zero -> no bytes consumed beyond the selector.
        let data = [0x00u8];
        let mut stream = ByteStream::new(&data, 0, 1);
        let cfg = SysConfig::default();
        let out = decode_frame(&def, &mut stream, &ctx(&cfg)).unwrap();
        assert_eq!(out, vec![0, 0, 0, 0]);
    }
}
