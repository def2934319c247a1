//! Runtime configuration for the control loop.
//!
//! These are the structs the loop actually consumes, with durations already
//! resolved. They are separate from the TOML-deserialized config in
//! `saw_config`; see `conversions.rs` for the mapping.
use std::time::Duration;

use crate::codec::{CUTTING_SPEED_REGISTER, DESCENT_SPEED_REGISTER};

/// Pacing, settling and gain settings for the correction strategies.
#[derive(Debug, Clone)]
pub struct ControlCfg {
    /// Sleep between polls.
    pub poll_interval: Duration,
    /// Minimum time between two actuator writes.
    pub speed_adjustment_interval: Duration,
    /// Corrections are measured but not applied this long after a cut starts.
    pub settle: Duration,
    /// Descent speed is never driven below this.
    pub descent_floor: f64,
    /// Cutting speed is never driven above this.
    pub cutting_ceiling: f64,
    /// Base gain applied to the descent channel when slowing down, and to the
    /// cutting channel (times `cutting_gain_scale`) when speeding up.
    pub descent_gain: f64,
    pub cutting_gain_scale: f64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            speed_adjustment_interval: Duration::from_millis(200),
            settle: Duration::from_secs(5),
            descent_floor: 20.0,
            cutting_ceiling: 100.0,
            descent_gain: 0.1,
            cutting_gain_scale: 0.7,
        }
    }
}

/// Ratio tracking and enforcement settings. Ratios are in percent
/// (`descent / cutting * 100`).
#[derive(Debug, Clone)]
pub struct RatioCfg {
    pub initial_percent: f64,
    pub check_interval: Duration,
    /// Cutting-speed drift that triggers a nudge.
    pub drift_threshold: f64,
    pub nudge_percent: f64,
    pub tolerance_percent: f64,
    /// Speed step per enforcement iteration.
    pub step: f64,
    pub max_iterations: u32,
}

impl Default for RatioCfg {
    fn default() -> Self {
        Self {
            initial_percent: 55.0 / 78.0 * 100.0,
            check_interval: Duration::from_millis(500),
            drift_threshold: 0.5,
            nudge_percent: 3.0,
            tolerance_percent: 1.0,
            step: 0.1,
            max_iterations: 10_000,
        }
    }
}

/// Output scaling for the height-interpolated strategy.
#[derive(Debug, Clone)]
pub struct LinearCfg {
    pub multiplier: f64,
    pub min_speed: f64,
    pub max_speed: f64,
}

impl Default for LinearCfg {
    fn default() -> Self {
        Self {
            multiplier: 1.2,
            min_speed: 5.0,
            max_speed: 101.0,
        }
    }
}

/// Register addressing on the field bus.
#[derive(Debug, Clone)]
pub struct BusCfg {
    pub start_address: u16,
    pub cutting_register: u16,
    pub descent_register: u16,
}

impl Default for BusCfg {
    fn default() -> Self {
        Self {
            start_address: 0,
            cutting_register: CUTTING_SPEED_REGISTER,
            descent_register: DESCENT_SPEED_REGISTER,
        }
    }
}
