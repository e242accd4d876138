// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rate conversion formulas consumed by the facade's computed fields.

use crate::config::SysConfig;

/// `gyroScale * 1e6 / (pi/180)`, scaled so the decoder's internal raw
/// gyro units convert to degrees per second.
pub fn gyro_raw_to_deg_per_sec(sys_config: &SysConfig, raw: i32) -> f64 {
    (sys_config.gyro_scale * 1_000_000.0 / (std::f64::consts::PI / 180.0)) * raw as f64
}

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Converts a raw `rcCommand` value into degrees per second for `axis`,
/// following the Betaflight >= 3.0.0 / Cleanflight >= 2.0.0 rate curve.
/// Callers should gate use of this formula on [`SysConfig::rc_rate_formula_gate`];
/// on older firmware the caller is expected to use the legacy per-firmware
/// conversion (not modeled here, as the source spec does not define one).
pub fn rc_command_raw_to_deg_per_sec(sys_config: &SysConfig, rc: f64, axis: usize) -> f64 {
    let mut f = rc / 500.0;
    let mag = f.abs();

    let expo = sys_config.rc_expo.get(axis).copied().unwrap_or(0) as f64;
    if expo != 0.0 {
        let e = expo / 100.0;
        f = f * mag * mag * mag * e + f * (1.0 - e);
    }

    let r = sys_config.rc_rates.get(axis).copied().unwrap_or(sys_config.rc_rate) as f64 / 100.0;
    let r = if r > 2.0 { r + 14.54 * (r - 2.0) } else { r };

    let mut angle_rate = 200.0 * r * f;

    let rate = sys_config.rates.get(axis).copied().unwrap_or(0) as f64;
    if rate != 0.0 {
        angle_rate /= clamp(1.0 - mag * rate / 100.0, 0.01, 1.0);
    }

    let rate_limit = sys_config.rate_limits.get(axis).copied();
    if sys_config.pid_controller == 0 || rate_limit.is_none() {
        // `>> 2` in the source firmware: an arithmetic right shift, i.e.
        // floor division by 4, not truncating division.
        (clamp(angle_rate * 4.1, -8190.0, 8190.0) / 4.0).floor()
    } else {
        let limit = rate_limit.unwrap() as f64;
        clamp(angle_rate, -limit, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gyro_conversion_scales_by_gyro_scale() {
        // This is the gyroScale value the header parser derives from the
        // hex-encoded `pi/180 * 1e-6` constant, so raw and deg/s coincide.
        let mut cfg = SysConfig::default();
        cfg.gyro_scale = 1.7453292519943295e-8;
        let deg = gyro_raw_to_deg_per_sec(&cfg, 1000);
        assert!((deg - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn rc_command_conversion_is_zero_at_zero_input() {
        let cfg = SysConfig::default();
        let deg = rc_command_raw_to_deg_per_sec(&cfg, 0.0, 0);
        assert_eq!(deg, 0.0);
    }

    #[test]
    fn rc_command_conversion_expo_term_keeps_input_sign() {
        let mut cfg = SysConfig::default();
        cfg.rc_expo = vec![50, 50, 50];
        cfg.rc_rates = vec![100, 100, 100];
        let positive = rc_command_raw_to_deg_per_sec(&cfg, 250.0, 0);
        let negative = rc_command_raw_to_deg_per_sec(&cfg, -250.0, 0);
        assert!(positive > 0.0);
        assert_eq!(negative, -positive);
    }

    #[test]
    fn rc_command_conversion_respects_rate_limit_when_pid_controller_nonzero() {
        let mut cfg = SysConfig::default();
        cfg.pid_controller = 1;
        cfg.rate_limits = vec![670, 670, 670];
        cfg.rc_rates = vec![175, 175, 128];
        let deg = rc_command_raw_to_deg_per_sec(&cfg, 500.0, 0);
        assert!(deg <= 670.0);
    }
}
