//! `From` implementations bridging `saw_config` types to `saw_core` types.
use std::time::Duration;

use crate::config::{BusCfg, ControlCfg, LinearCfg, RatioCfg};
use crate::fuzzy::FuzzyEngine;
use crate::retry::RetryPolicy;
use crate::runner::RunOptions;

// ── ControlCfg ───────────────────────────────────────────────────────────────

impl From<&saw_config::ControlCfg> for ControlCfg {
    fn from(c: &saw_config::ControlCfg) -> Self {
        Self {
            poll_interval: Duration::from_millis(c.poll_interval_ms),
            speed_adjustment_interval: Duration::from_millis(c.speed_adjustment_interval_ms),
            settle: Duration::from_millis(c.settle_ms),
            descent_floor: c.descent_floor,
            cutting_ceiling: c.cutting_ceiling,
            descent_gain: c.descent_gain,
            cutting_gain_scale: c.cutting_gain_scale,
        }
    }
}

// ── RatioCfg ─────────────────────────────────────────────────────────────────

impl From<&saw_config::RatioCfg> for RatioCfg {
    fn from(c: &saw_config::RatioCfg) -> Self {
        Self {
            initial_percent: c.initial_percent,
            check_interval: Duration::from_millis(c.check_interval_ms),
            drift_threshold: c.drift_threshold,
            nudge_percent: c.nudge_percent,
            tolerance_percent: c.tolerance_percent,
            step: c.step,
            max_iterations: c.max_iterations,
        }
    }
}

// ── LinearCfg ────────────────────────────────────────────────────────────────

impl From<&saw_config::LinearCfg> for LinearCfg {
    fn from(c: &saw_config::LinearCfg) -> Self {
        Self {
            multiplier: c.multiplier,
            min_speed: c.min_speed,
            max_speed: c.max_speed,
        }
    }
}

// ── BusCfg ───────────────────────────────────────────────────────────────────

impl From<&saw_config::FieldbusCfg> for BusCfg {
    fn from(c: &saw_config::FieldbusCfg) -> Self {
        Self {
            start_address: c.start_address,
            cutting_register: c.cutting_register,
            descent_register: c.descent_register,
        }
    }
}

// ── RetryPolicy ──────────────────────────────────────────────────────────────

impl From<&saw_config::RetryCfg> for RetryPolicy {
    fn from(c: &saw_config::RetryCfg) -> Self {
        Self::new(
            Duration::from_millis(c.initial_backoff_ms),
            Duration::from_millis(c.max_backoff_ms),
            c.jitter,
        )
    }
}

// ── RunOptions ───────────────────────────────────────────────────────────────

impl From<&saw_config::Config> for RunOptions {
    fn from(c: &saw_config::Config) -> Self {
        Self {
            max_cycles: None,
            retry: RetryPolicy::from(&c.retry),
            reconnect_delay: Duration::from_millis(c.retry.reconnect_delay_ms),
        }
    }
}

// ── FuzzyEngine ──────────────────────────────────────────────────────────────

impl From<&saw_config::FuzzyCfg> for FuzzyEngine {
    fn from(c: &saw_config::FuzzyCfg) -> Self {
        Self::canonical_with_resolution(c.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_agree_across_crates() {
        let cfg = saw_config::Config::default();
        let control = ControlCfg::from(&cfg.control);
        let d = ControlCfg::default();
        assert_eq!(control.poll_interval, d.poll_interval);
        assert_eq!(control.speed_adjustment_interval, d.speed_adjustment_interval);
        assert_eq!(control.settle, d.settle);
        assert_eq!(control.descent_gain, d.descent_gain);

        let ratio = RatioCfg::from(&cfg.ratio);
        assert_eq!(ratio.check_interval, RatioCfg::default().check_interval);
        assert_eq!(ratio.initial_percent, RatioCfg::default().initial_percent);

        let bus = BusCfg::from(&cfg.fieldbus);
        assert_eq!(bus.cutting_register, 2066);
        assert_eq!(bus.descent_register, 2041);
    }

    #[test]
    fn retry_from_config_uses_initial_backoff() {
        let cfg = saw_config::RetryCfg {
            jitter: 0.0,
            ..saw_config::RetryCfg::default()
        };
        let mut p = RetryPolicy::from(&cfg);
        assert_eq!(p.next_delay(), Duration::from_millis(cfg.initial_backoff_ms));
    }
}
