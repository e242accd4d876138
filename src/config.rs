// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed system-configuration record populated by the header parser.
//!
//! Grounded in `hdds-recording`'s `RecorderConfig`/`PlayerConfig`
//! (owned struct, `::new`-seeded defaults, `fn field(mut self, v) -> Self`
//! chaining): the source format's free-form config map is replaced here
//! with one field per header key named in the wire format, per the design
//! note on dynamic map-like configuration.

use std::collections::HashMap;

/// Recognized flight-controller firmware families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum FirmwareType {
    Unknown = 0,
    Baseflight = 1,
    Cleanflight = 2,
    Betaflight = 3,
    Raceflight = 4,
    Inav = 5,
}

impl Default for FirmwareType {
    fn default() -> Self {
        FirmwareType::Unknown
    }
}

/// Header keys pass through this table before being matched against a
/// known family, so legacy/alternate spellings resolve to one canonical
/// name. Grounded in spec.md's `dterm_lowpass_hz -> dterm_lpf_hz` example.
pub const ALIAS_TABLE: &[(&str, &str)] = &[
    ("dterm_lowpass_hz", "dterm_lpf_hz"),
    ("dterm_lowpass_dyn_hz", "dterm_lpf_dyn_hz"),
    ("dterm_notch_hz", "dterm_notch_hz"),
    ("gyro.scale", "gyro_scale"),
    ("gyro_lowpass_hz", "gyro_lpf_hz"),
    ("acc_hardware", "acc_hardware"),
    ("currentMeter", "currentSensor"),
    ("vbat_scale", "vbatscale"),
    ("vbatcellvoltage", "vbatcellvoltage"),
];

pub fn normalize_header_key(key: &str) -> String {
    for (from, to) in ALIAS_TABLE {
        if *from == key {
            return (*to).to_string();
        }
    }
    key.to_string()
}

/// A CSV header value coerced element-wise: floats if the element contains
/// a `.`, integers otherwise, falling back to the literal string.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ConfigValue {
    pub fn as_i64(&self) -> i64 {
        match self {
            ConfigValue::Int(v) => *v,
            ConfigValue::Float(v) => *v as i64,
            ConfigValue::Text(v) => v.parse().unwrap_or(0),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            ConfigValue::Int(v) => *v as f64,
            ConfigValue::Float(v) => *v,
            ConfigValue::Text(v) => v.parse().unwrap_or(0.0),
        }
    }
}

/// Splits a CSV header value into coerced elements, optionally right-
/// padding with a default to a fixed length.
pub fn parse_csv_values(raw: &str, pad_to: Option<usize>) -> Vec<ConfigValue> {
    let mut values: Vec<ConfigValue> = raw
        .split(',')
        .map(|elem| {
            let elem = elem.trim();
            if elem.contains('.') {
                elem.parse::<f64>()
                    .map(ConfigValue::Float)
                    .unwrap_or_else(|_| ConfigValue::Text(elem.to_string()))
            } else {
                elem.parse::<i64>()
                    .map(ConfigValue::Int)
                    .unwrap_or_else(|_| ConfigValue::Text(elem.to_string()))
            }
        })
        .collect();
    if let Some(len) = pad_to {
        while values.len() < len {
            values.push(ConfigValue::Int(0));
        }
    }
    values
}

/// Typed system-configuration record, seeded with the defaults named in
/// §3 and progressively overwritten by header lines as they are parsed.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SysConfig {
    pub frame_interval_i: i64,
    pub p_num: i64,
    pub p_denom: i64,
    pub rc_rate: i64,
    pub rc_rates: Vec<i64>,
    pub rc_expo: Vec<i64>,
    pub rates: Vec<i64>,
    pub rate_limits: Vec<i64>,
    pub roll_pid: Vec<i64>,
    pub pitch_pid: Vec<i64>,
    pub yaw_pid: Vec<i64>,
    pub motor_output: [i64; 2],
    pub gyro_scale: f64,
    pub acc_1g: i64,
    pub vbatref: i64,
    pub vbatmincellvoltage: i64,
    pub vbatwarningcellvoltage: i64,
    pub vbatmaxcellvoltage: i64,
    pub vbatscale: i64,
    pub min_throttle: i64,
    pub max_throttle: i64,
    pub looptime: i64,
    pub pid_process_denom: i64,
    pub debug_mode: i64,
    pub features: i64,
    pub motor_pwm_protocol: i64,
    pub pid_controller: i64,
    pub pid_sum_limit: i64,
    pub pid_sum_limit_yaw: i64,
    pub fields_disabled_mask: i64,
    pub rate_accel_limit: f64,
    pub yaw_rate_accel_limit: f64,
    pub dterm_lpf_dyn_hz: Vec<i64>,
    pub gyro_lpf_dyn_hz: Vec<i64>,
    /// Filter cutoff headers (`*_lpf_hz`, `*_notch_*`), version-scaled and
    /// stored by their normalized key. Not consumed by any computed field
    /// in this decoder's scope, but retained for external tooling.
    pub filter_headers: Vec<(String, f64)>,
    /// Gates whether `TAG8_4S16` fields use the v1 (4-bit nibble) or v2
    /// (6/6/4-bit) layout. Defaults to 2 (the only layout in wide use);
    /// a `Data version` header line below that overwrites it.
    pub data_version: i32,
    pub firmware_type: FirmwareType,
    pub firmware: String,
    pub firmware_patch: String,
    pub firmware_version: String,
    /// Header keys recognized but not yet matched by a known family,
    /// preserved verbatim so downstream tools can still inspect them.
    pub unknown_headers: Vec<(String, String)>,
}

impl Default for SysConfig {
    fn default() -> Self {
        Self {
            frame_interval_i: 32,
            p_num: 1,
            p_denom: 1,
            rc_rate: 90,
            rc_rates: Vec::new(),
            rc_expo: Vec::new(),
            rates: Vec::new(),
            rate_limits: Vec::new(),
            roll_pid: Vec::new(),
            pitch_pid: Vec::new(),
            yaw_pid: Vec::new(),
            motor_output: [1150, 1850],
            gyro_scale: 1e-4,
            acc_1g: 0,
            vbatref: 0,
            vbatmincellvoltage: 0,
            vbatwarningcellvoltage: 0,
            vbatmaxcellvoltage: 0,
            vbatscale: 0,
            min_throttle: 0,
            max_throttle: 0,
            looptime: 0,
            pid_process_denom: 1,
            debug_mode: 0,
            features: 0,
            motor_pwm_protocol: 0,
            pid_controller: 0,
            pid_sum_limit: 0,
            pid_sum_limit_yaw: 0,
            fields_disabled_mask: 0,
            rate_accel_limit: 0.0,
            yaw_rate_accel_limit: 0.0,
            dterm_lpf_dyn_hz: Vec::new(),
            gyro_lpf_dyn_hz: Vec::new(),
            filter_headers: Vec::new(),
            data_version: 2,
            firmware_type: FirmwareType::Unknown,
            firmware: String::new(),
            firmware_patch: String::new(),
            firmware_version: String::new(),
            unknown_headers: Vec::new(),
        }
    }
}

impl SysConfig {
    /// One predicate encapsulating every version gate in §4.2, applied at
    /// header-ingestion time rather than scattered across call sites.
    pub fn firmware_at_least(&self, ty: FirmwareType, version: (u32, u32, u32)) -> bool {
        if self.firmware_type != ty {
            return false;
        }
        parse_semver(&self.firmware_version)
            .map(|v| v >= version)
            .unwrap_or(false)
    }

    /// True for Betaflight >= 3.1.0 or Cleanflight >= 2.0.0 — the gate
    /// `yawRateAccelLimit`/`rateAccelLimit` are scaled against.
    pub fn accel_limit_gate(&self) -> bool {
        self.firmware_at_least(FirmwareType::Betaflight, (3, 1, 0))
            || self.firmware_at_least(FirmwareType::Cleanflight, (2, 0, 0))
    }

    /// True for Betaflight >= 3.0.0 or Cleanflight >= 2.0.0 — the gate
    /// `rcCommandRawToDegPerSec` is defined under.
    pub fn rc_rate_formula_gate(&self) -> bool {
        self.firmware_at_least(FirmwareType::Betaflight, (3, 0, 0))
            || self.firmware_at_least(FirmwareType::Cleanflight, (2, 0, 0))
    }

    pub fn record_unknown(&mut self, key: &str, value: &str) {
        self.unknown_headers
            .push((key.to_string(), value.to_string()));
    }

    pub fn record_filter_header(&mut self, key: &str, value: f64) {
        self.filter_headers.push((key.to_string(), value));
    }
}

fn parse_semver(v: &str) -> Option<(u32, u32, u32)> {
    let mut parts = v.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().unwrap_or(0);
    let patch = parts.next().unwrap_or("0").parse().unwrap_or(0);
    Some((major, minor, patch))
}

/// Detects `{Betaflight|Cleanflight|Raceflight|INAV} MAJOR.MINOR(.PATCH)?`
/// in a `Firmware revision` header value.
pub fn detect_firmware(revision: &str) -> Option<(FirmwareType, String)> {
    const FAMILIES: &[(&str, FirmwareType)] = &[
        ("Betaflight", FirmwareType::Betaflight),
        ("Cleanflight", FirmwareType::Cleanflight),
        ("Raceflight", FirmwareType::Raceflight),
        ("INAV", FirmwareType::Inav),
    ];
    for (name, ty) in FAMILIES {
        if let Some(rest) = revision.strip_prefix(name) {
            let rest = rest.trim_start();
            let version: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if !version.is_empty() {
                return Some((*ty, version));
            }
        }
    }
    None
}

#[allow(dead_code)]
pub type UnknownHeaderMap = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_seeds_spec_constants() {
        let cfg = SysConfig::default();
        assert_eq!(cfg.frame_interval_i, 32);
        assert_eq!(cfg.rc_rate, 90);
        assert_eq!(cfg.motor_output, [1150, 1850]);
        assert!((cfg.gyro_scale - 1e-4).abs() < f64::EPSILON);
    }

    #[test]
    fn alias_table_normalizes_known_keys() {
        assert_eq!(normalize_header_key("dterm_lowpass_hz"), "dterm_lpf_hz");
        assert_eq!(normalize_header_key("unknown_key"), "unknown_key");
    }

    #[test]
    fn csv_values_coerce_by_dot_presence() {
        let values = parse_csv_values("1,2.5,abc", None);
        assert_eq!(values[0], ConfigValue::Int(1));
        assert_eq!(values[1], ConfigValue::Float(2.5));
        assert_eq!(values[2], ConfigValue::Text("abc".to_string()));
    }

    #[test]
    fn csv_values_pad_with_zero() {
        let values = parse_csv_values("1,2", Some(4));
        assert_eq!(values.len(), 4);
        assert_eq!(values[3], ConfigValue::Int(0));
    }

    #[test]
    fn detect_firmware_parses_family_and_version() {
        let (ty, version) = detect_firmware("Betaflight 4.2.0").unwrap();
        assert_eq!(ty, FirmwareType::Betaflight);
        assert_eq!(version, "4.2.0");
    }

    #[test]
    fn firmware_at_least_compares_semver() {
        let mut cfg = SysConfig::default();
        cfg.firmware_type = FirmwareType::Betaflight;
        cfg.firmware_version = "4.2.0".to_string();
        assert!(cfg.firmware_at_least(FirmwareType::Betaflight, (4, 0, 0)));
        assert!(!cfg.firmware_at_least(FirmwareType::Betaflight, (4, 3, 0)));
        assert!(cfg.rc_rate_formula_gate());
        assert!(cfg.accel_limit_gate());
    }
}
