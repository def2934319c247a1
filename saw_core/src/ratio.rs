//! Descent:cutting ratio tracking and enforcement.
//!
//! The ratio is `descent / cutting * 100`. Its target follows the operator:
//! it is re-seeded from the machine at each cut start and nudged when the
//! cutting speed drifts during a cut.
use std::time::Instant;

use crate::config::RatioCfg;
use crate::error::ControlError;

/// Cutting speeds at or below this make the ratio undefined.
pub const DEGENERATE_SPEED: f64 = f64::EPSILON;

/// `descent / cutting * 100`, or `None` when cutting speed is degenerate.
pub fn ratio_of(cutting: f64, descent: f64) -> Option<f64> {
    if !(cutting.is_finite() && descent.is_finite()) || cutting <= DEGENERATE_SPEED {
        return None;
    }
    Some(descent / cutting * 100.0)
}

#[derive(Debug, Clone)]
pub struct RatioTracker {
    cfg: RatioCfg,
    target_percent: f64,
    /// Cutting speed and time of the last nudge (or first observation).
    baseline: Option<(f64, Instant)>,
}

impl RatioTracker {
    pub const fn new(cfg: RatioCfg) -> Self {
        let target_percent = cfg.initial_percent;
        Self {
            cfg,
            target_percent,
            baseline: None,
        }
    }

    pub const fn target_percent(&self) -> f64 {
        self.target_percent
    }

    pub const fn cfg(&self) -> &RatioCfg {
        &self.cfg
    }

    pub fn baseline_speed(&self) -> Option<f64> {
        self.baseline.map(|(s, _)| s)
    }

    /// Nudge the target when the cutting speed has drifted since the last
    /// check. Returns the new target when it moved.
    pub fn check_and_update(&mut self, cutting_speed: f64, now: Instant) -> Option<f64> {
        let Some((base_speed, since)) = self.baseline else {
            self.baseline = Some((cutting_speed, now));
            return None;
        };
        if now.saturating_duration_since(since) < self.cfg.check_interval {
            return None;
        }
        let drift = cutting_speed - base_speed;
        if drift.abs() < self.cfg.drift_threshold {
            return None;
        }
        self.target_percent += self.cfg.nudge_percent.copysign(drift);
        self.baseline = Some((cutting_speed, now));
        tracing::debug!(
            target_percent = self.target_percent,
            drift,
            "ratio target nudged"
        );
        Some(self.target_percent)
    }

    /// Adopt the ratio the machine is running at as the new target.
    pub fn begin_cut(&mut self, observed: Option<f64>) {
        if let Some(r) = observed {
            self.target_percent = r;
        }
        self.baseline = None;
    }

    /// Snapshot the ratio at the end of a cut as the provisional target for
    /// the next one.
    pub fn end_cut(&mut self, observed: Option<f64>) {
        if let Some(r) = observed {
            self.target_percent = r;
        }
        self.baseline = None;
    }

    /// Step one of the two speeds until the ratio is within tolerance of the
    /// target.
    ///
    /// Ratio too low: lower cutting when `correction_sign < 0`, otherwise
    /// raise descent. Ratio too high: raise cutting when
    /// `correction_sign > 0`, otherwise lower descent.
    pub fn enforce_ratio(
        &self,
        cutting: f64,
        descent: f64,
        correction_sign: f64,
    ) -> Result<(f64, f64), ControlError> {
        let (mut c, mut d) = (cutting, descent);
        let step = self.cfg.step;
        for _ in 0..self.cfg.max_iterations {
            let ratio =
                ratio_of(c, d).ok_or(ControlError::Degenerate("cutting speed is zero"))?;
            let err = ratio - self.target_percent;
            if err.abs() <= self.cfg.tolerance_percent {
                return Ok((c, d));
            }
            match (err < 0.0, correction_sign) {
                (true, s) if s < 0.0 => c -= step,
                (true, _) => d += step,
                (false, s) if s > 0.0 => c += step,
                (false, _) => d -= step,
            }
        }
        Err(ControlError::RatioDiverged {
            iterations: self.cfg.max_iterations,
        })
    }
}
