// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parses the ASCII `H key:value\n` header section of a sub-log into a
//! [`SysConfig`] and a set of per-frame-type [`FrameDef`]s.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::{detect_firmware, normalize_header_key, parse_csv_values, SysConfig};
use crate::error::HeaderError;
use crate::frame_def::{FrameDef, FrameKind};
use crate::stream::{sign_extend, ByteStream};

pub struct ParsedHeader {
    pub sys_config: SysConfig,
    pub frame_defs: HashMap<FrameKind, FrameDef>,
}

fn is_frame_marker(b: u8) -> bool {
    matches!(b, b'I' | b'P' | b'S' | b'E' | b'G' | b'H')
}

/// Consumes `H key:value\n` lines from `stream` until EOF or the first
/// byte that is both a recognized frame marker and not itself the start
/// of another header line.
pub fn parse_header(stream: &mut ByteStream) -> Result<ParsedHeader, HeaderError> {
    let mut sys_config = SysConfig::default();
    let mut frame_defs: HashMap<FrameKind, FrameDef> = HashMap::new();

    loop {
        let lead = stream.peek_char();
        if lead < 0 {
            break;
        }
        if lead != b'H' as i32 {
            if is_frame_marker(lead as u8) {
                break;
            }
            // Not a header line and not a recognized frame marker: the
            // stream is already positioned past the header section in a
            // way we don't understand. Stop rather than loop forever.
            break;
        }

        stream.read_char(); // consume 'H'
        let sp = stream.read_char();
        if sp != b' ' as i32 {
            return Err(HeaderError::Truncated { offset: stream.pos });
        }
        let line = stream.read_line();
        let Some(colon) = line.find(':') else {
            continue;
        };
        let raw_key = &line[..colon];
        let value = &line[colon + 1..];
        handle_header_line(&mut sys_config, &mut frame_defs, raw_key, value);
    }

    let i_def = frame_defs.get(&FrameKind::Intra);
    if !i_def.map(FrameDef::is_complete).unwrap_or(false) {
        return Err(HeaderError::HeaderIncomplete);
    }
    let i_def = i_def.unwrap().clone();

    let p_def = frame_defs.entry(FrameKind::Predicted).or_default();
    if p_def.name.is_empty() {
        p_def.inherit_schema_from(&i_def);
    }
    if p_def.predictor.is_empty() && p_def.encoding.is_empty() {
        return Err(HeaderError::MissingPFrameDef);
    }

    Ok(ParsedHeader {
        sys_config,
        frame_defs,
    })
}

fn handle_header_line(
    cfg: &mut SysConfig,
    frame_defs: &mut HashMap<FrameKind, FrameDef>,
    raw_key: &str,
    value: &str,
) {
    let key = normalize_header_key(raw_key);

    if let Some(rest) = key.strip_prefix("Field ") {
        if handle_field_descriptor(frame_defs, rest, value) {
            return;
        }
    }

    match key.as_str() {
        "I interval" => cfg.frame_interval_i = value.trim().parse::<i64>().unwrap_or(1).max(1),
        "P interval" => {
            if let Some((a, b)) = value.split_once('/') {
                cfg.p_num = a.trim().parse().unwrap_or(1);
                cfg.p_denom = b.trim().parse().unwrap_or(1);
            } else {
                cfg.p_num = 1;
                cfg.p_denom = value.trim().parse().unwrap_or(1);
            }
        }
        "gyro_scale" | "gyro.scale" => {
            let mut scale = decode_gyro_scale_hex(value.trim()) as f64;
            if matches!(
                cfg.firmware_type,
                crate::config::FirmwareType::Betaflight
                    | crate::config::FirmwareType::Cleanflight
                    | crate::config::FirmwareType::Inav
            ) {
                scale *= std::f64::consts::PI / 180.0 * 1e-6;
            }
            cfg.gyro_scale = scale;
        }
        "yawRateAccelLimit" | "rateAccelLimit" => {
            let raw: f64 = value.trim().parse().unwrap_or(0.0);
            let scaled = if cfg.accel_limit_gate() {
                raw / 1000.0
            } else {
                raw
            };
            if key == "yawRateAccelLimit" {
                cfg.yaw_rate_accel_limit = scaled;
            } else {
                cfg.rate_accel_limit = scaled;
            }
            debug!(key = %key, value = scaled, "scaled accel limit header");
        }
        "minthrottle" => {
            cfg.min_throttle = value.trim().parse().unwrap_or(0);
            cfg.motor_output[0] = cfg.min_throttle;
        }
        "maxthrottle" => {
            cfg.max_throttle = value.trim().parse().unwrap_or(0);
            cfg.motor_output[1] = cfg.max_throttle;
        }
        "motorOutput" => {
            let values = parse_csv_values(value, Some(2));
            cfg.motor_output = [values[0].as_i64(), values[1].as_i64()];
        }
        "vbatcellvoltage" => {
            let values = parse_csv_values(value, Some(3));
            cfg.vbatmincellvoltage = values[0].as_i64();
            cfg.vbatwarningcellvoltage = values[1].as_i64();
            cfg.vbatmaxcellvoltage = values[2].as_i64();
        }
        "vbatref" => cfg.vbatref = value.trim().parse().unwrap_or(0),
        "vbatscale" => cfg.vbatscale = value.trim().parse().unwrap_or(0),
        "acc_1G" => cfg.acc_1g = value.trim().parse().unwrap_or(0),
        "looptime" => cfg.looptime = value.trim().parse().unwrap_or(0),
        "pid_process_denom" => cfg.pid_process_denom = value.trim().parse().unwrap_or(1),
        "debug_mode" => cfg.debug_mode = value.trim().parse().unwrap_or(0),
        "features" => cfg.features = value.trim().parse().unwrap_or(0),
        "motor_pwm_protocol" => cfg.motor_pwm_protocol = value.trim().parse().unwrap_or(0),
        "pidController" => cfg.pid_controller = value.trim().parse().unwrap_or(0),
        "pidSumLimit" => cfg.pid_sum_limit = value.trim().parse().unwrap_or(0),
        "pidSumLimitYaw" => cfg.pid_sum_limit_yaw = value.trim().parse().unwrap_or(0),
        "fields_disabled_mask" => cfg.fields_disabled_mask = value.trim().parse().unwrap_or(0),
        "Data version" => cfg.data_version = value.trim().parse().unwrap_or(2),
        "rc_rate" => cfg.rc_rate = value.trim().parse().unwrap_or(90),
        "rcRate" | "rc_rates" => {
            cfg.rc_rates = parse_csv_values(value, Some(3))
                .iter()
                .map(|v| v.as_i64())
                .collect()
        }
        "rcExpo" | "rc_expo" => {
            cfg.rc_expo = parse_csv_values(value, Some(3))
                .iter()
                .map(|v| v.as_i64())
                .collect()
        }
        "rates" => {
            cfg.rates = parse_csv_values(value, Some(3))
                .iter()
                .map(|v| v.as_i64())
                .collect()
        }
        "rate_limits" => {
            cfg.rate_limits = parse_csv_values(value, Some(3))
                .iter()
                .map(|v| v.as_i64())
                .collect()
        }
        "rollPID" => cfg.roll_pid = parse_csv_values(value, None).iter().map(|v| v.as_i64()).collect(),
        "pitchPID" => {
            cfg.pitch_pid = parse_csv_values(value, None).iter().map(|v| v.as_i64()).collect()
        }
        "yawPID" => cfg.yaw_pid = parse_csv_values(value, None).iter().map(|v| v.as_i64()).collect(),
        "Firmware revision" => {
            if let Some((ty, version)) = detect_firmware(value) {
                cfg.firmware_type = ty;
                cfg.firmware_version = version.clone();
                cfg.firmware = format!("{:?}", ty);
                cfg.firmware_patch = version.rsplit('.').next().unwrap_or("").to_string();
            }
        }
        "dterm_lpf_dyn_hz" => {
            cfg.dterm_lpf_dyn_hz = parse_csv_values(value, Some(2))
                .iter()
                .map(|v| v.as_i64())
                .collect()
        }
        "gyro_lpf_dyn_hz" => {
            cfg.gyro_lpf_dyn_hz = parse_csv_values(value, Some(2))
                .iter()
                .map(|v| v.as_i64())
                .collect()
        }
        key if key.ends_with("_lpf_hz") || key.contains("_notch_") => {
            let raw: f64 = value.trim().parse().unwrap_or(0.0);
            let scaled = if !cfg.accel_limit_gate() {
                raw / 100.0
            } else {
                raw
            };
            debug!(key, value = scaled, "scaled filter header");
            cfg.record_filter_header(key, scaled);
        }
        // `digitalIdleOffset` falls through to here rather than sharing a
        // case with `dterm_cut_hz` — the original parser's fall-through
        // between the two was ambiguous, so this keeps them isolated.
        _ => {
            warn!(key = %raw_key, "unrecognized header key");
            cfg.record_unknown(raw_key, value);
        }
    }
}

/// Handles `Field <T> <sub>` lines; returns `true` if `rest` matched that
/// shape (whether or not `<T>` was a recognized frame type).
fn handle_field_descriptor(
    frame_defs: &mut HashMap<FrameKind, FrameDef>,
    rest: &str,
    value: &str,
) -> bool {
    let mut parts = rest.splitn(2, ' ');
    let letter = parts.next().unwrap_or("");
    let sub = parts.next().unwrap_or("");
    let Some(kind) = letter.chars().next().and_then(FrameKind::from_letter) else {
        return false;
    };
    if letter.len() != 1 {
        return false;
    }

    let def = frame_defs.entry(kind).or_default();
    match sub {
        "name" => {
            let names: Vec<String> = value.split(',').map(|s| s.to_string()).collect();
            def.set_names(&names);
        }
        "signed" => {
            let values: Vec<bool> = value.split(',').map(|s| s.trim() == "1").collect();
            def.set_signed(&values);
        }
        "predictor" => {
            let values: Vec<u8> = value
                .split(',')
                .map(|s| s.trim().parse().unwrap_or(0))
                .collect();
            def.set_predictor(&values);
        }
        "encoding" => {
            let values: Vec<u8> = value
                .split(',')
                .map(|s| s.trim().parse().unwrap_or(0))
                .collect();
            def.set_encoding(&values);
        }
        _ => return false,
    }
    true
}

/// Interprets `hex` as the bit pattern of a 32-bit IEEE-754 float.
pub fn decode_gyro_scale_hex(hex: &str) -> f32 {
    let bits = u32::from_str_radix(hex.trim_start_matches("0x"), 16).unwrap_or(0);
    f32::from_bits(bits)
}

/// Exposed for callers that need the raw sign-extension helper alongside
/// header decoding (e.g. tests asserting against §8's invariants).
pub fn sign_extend_pub(value: u32, width: u32) -> i32 {
    sign_extend(value, width)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(lines: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for line in lines {
            out.extend_from_slice(b"H ");
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        out
    }

    #[test]
    fn parses_minimal_complete_header() {
        let data = header_bytes(&[
            "I interval:32",
            "P interval:1/8",
            "Field I name:loopIteration,time,gyroADC[0]",
            "Field I signed:0,0,1",
            "Field I predictor:0,0,0",
            "Field I encoding:1,1,0",
            "Field P predictor:1,1,1",
            "Field P encoding:0,0,0",
        ]);
        let mut stream = ByteStream::new(&data, 0, data.len());
        let parsed = parse_header(&mut stream).expect("header should parse");
        assert_eq!(parsed.sys_config.frame_interval_i, 32);
        assert_eq!(parsed.sys_config.p_num, 1);
        assert_eq!(parsed.sys_config.p_denom, 8);
        let i_def = &parsed.frame_defs[&FrameKind::Intra];
        assert!(i_def.is_complete());
        assert_eq!(i_def.index_of("gyroADC[0]"), Some(2));
        let p_def = &parsed.frame_defs[&FrameKind::Predicted];
        assert_eq!(p_def.count, i_def.count);
    }

    #[test]
    fn stops_at_first_frame_marker() {
        let mut data = header_bytes(&[
            "I interval:32",
            "Field I name:a",
            "Field I predictor:0",
            "Field I encoding:1",
            "Field P predictor:1",
            "Field P encoding:0",
        ]);
        data.push(b'I');
        data.push(0x01);
        let mut stream = ByteStream::new(&data, 0, data.len());
        let parsed = parse_header(&mut stream).expect("header should parse");
        assert!(parsed.frame_defs[&FrameKind::Intra].is_complete());
        assert_eq!(stream.peek_char(), b'I' as i32);
    }

    #[test]
    fn missing_i_frame_def_is_header_incomplete() {
        let data = header_bytes(&["Firmware revision:Betaflight 4.2.0"]);
        let mut stream = ByteStream::new(&data, 0, data.len());
        let err = parse_header(&mut stream).unwrap_err();
        assert!(matches!(err, HeaderError::HeaderIncomplete));
    }

    #[test]
    fn unknown_keys_are_collected_not_fatal() {
        let mut data = header_bytes(&[
            "totally_unknown_key:42",
            "Field I name:a",
            "Field I predictor:0",
            "Field I encoding:1",
            "Field P predictor:1",
            "Field P encoding:0",
        ]);
        data.push(b'I');
        let mut stream = ByteStream::new(&data, 0, data.len());
        let parsed = parse_header(&mut stream).expect("header should parse");
        assert_eq!(
            parsed.sys_config.unknown_headers,
            vec![("totally_unknown_key".to_string(), "42".to_string())]
        );
    }

    #[test]
    fn gyro_scale_hex_round_trips() {
        let v = decode_gyro_scale_hex("3c23d70a");
        assert!((v - 0.01).abs() < 1e-6);
    }

    #[test]
    fn accel_limits_are_scaled_and_stored() {
        let mut data = header_bytes(&[
            "Firmware revision:Betaflight 4.2.0",
            "rateAccelLimit:5000",
            "yawRateAccelLimit:10000",
            "Field I name:a",
            "Field I predictor:0",
            "Field I encoding:1",
            "Field P predictor:1",
            "Field P encoding:0",
        ]);
        data.push(b'I');
        let mut stream = ByteStream::new(&data, 0, data.len());
        let parsed = parse_header(&mut stream).expect("header should parse");
        assert!((parsed.sys_config.rate_accel_limit - 5.0).abs() < 1e-9);
        assert!((parsed.sys_config.yaw_rate_accel_limit - 10.0).abs() < 1e-9);
    }

    #[test]
    fn filter_headers_are_scaled_and_retained() {
        let mut data = header_bytes(&[
            "dterm_lpf_hz:10000",
            "Field I name:a",
            "Field I predictor:0",
            "Field I encoding:1",
            "Field P predictor:1",
            "Field P encoding:0",
        ]);
        data.push(b'I');
        let mut stream = ByteStream::new(&data, 0, data.len());
        let parsed = parse_header(&mut stream).expect("header should parse");
        assert_eq!(parsed.sys_config.filter_headers.len(), 1);
        let (key, value) = &parsed.sys_config.filter_headers[0];
        assert_eq!(key, "dterm_lpf_hz");
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn dyn_hz_vectors_are_typed_not_unknown() {
        let mut data = header_bytes(&[
            "dterm_lpf_dyn_hz:70,170",
            "gyro_lpf_dyn_hz:100,350",
            "Field I name:a",
            "Field I predictor:0",
            "Field I encoding:1",
            "Field P predictor:1",
            "Field P encoding:0",
        ]);
        data.push(b'I');
        let mut stream = ByteStream::new(&data, 0, data.len());
        let parsed = parse_header(&mut stream).expect("header should parse");
        assert_eq!(parsed.sys_config.dterm_lpf_dyn_hz, vec![70, 170]);
        assert_eq!(parsed.sys_config.gyro_lpf_dyn_hz, vec![100, 350]);
        assert!(parsed.sys_config.unknown_headers.is_empty());
    }
}
