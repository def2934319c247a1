//! Speed-correction strategies.
//!
//! The control loop holds exactly one active strategy and hands it a
//! `CycleContext` per cutting cycle. The strategy either holds (with the
//! reason) or proposes new speeds; writing them is the loop's job.
use std::time::Instant;

use saw_config::ControlMode;
use serde::Serialize;

use crate::config::ControlCfg;
use crate::control::CorrectionState;
use crate::error::ControlError;
use crate::ratio::ratio_of;
use crate::status::CycleOutcome;
use crate::units::NormalizedReading;

/// Target speeds for one actuator write.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeedCommand {
    pub cutting_speed: f64,
    pub descent_speed: f64,
}

/// Inputs for one strategy evaluation.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext<'a> {
    pub reading: &'a NormalizedReading,
    /// Fuzzy correction factor for this reading.
    pub factor: f64,
    pub now: Instant,
    /// The pacing interval has passed since the last write.
    pub write_due: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    Hold(CycleOutcome),
    Command {
        command: SpeedCommand,
        /// Whole adjustment taken from the accumulator, restored if the
        /// write fails.
        taken: Option<(i64, i64)>,
    },
}

pub trait SpeedCorrectionStrategy: Send {
    fn mode(&self) -> ControlMode;

    fn evaluate(
        &self,
        ctx: &CycleContext<'_>,
        state: &mut CorrectionState,
    ) -> Result<Proposal, ControlError>;
}

/// Fuzzy-driven incremental correction with ratio enforcement.
#[derive(Debug, Clone)]
pub struct FuzzyAdaptive {
    cfg: ControlCfg,
}

impl FuzzyAdaptive {
    pub const fn new(cfg: ControlCfg) -> Self {
        Self { cfg }
    }

    /// `(cutting, descent)` multipliers for the factor's direction.
    ///
    /// Slowing down leans on descent; speeding up leans on cutting through
    /// the ratio.
    pub fn multipliers(&self, factor: f64, target_ratio_percent: f64) -> (f64, f64) {
        let gain = self.cfg.descent_gain;
        let scale = self.cfg.cutting_gain_scale;
        if factor < 0.0 {
            (target_ratio_percent / 1000.0 * scale, gain)
        } else {
            (gain * scale, target_ratio_percent / 1000.0)
        }
    }
}

fn direction(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl SpeedCorrectionStrategy for FuzzyAdaptive {
    fn mode(&self) -> ControlMode {
        ControlMode::Fuzzy
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(
        &self,
        ctx: &CycleContext<'_>,
        state: &mut CorrectionState,
    ) -> Result<Proposal, ControlError> {
        let r = ctx.reading;
        let f = ctx.factor;

        if r.descent_speed <= self.cfg.descent_floor && f < 0.0 {
            return Ok(Proposal::Hold(CycleOutcome::PinnedFloor));
        }
        if r.cutting_speed >= self.cfg.cutting_ceiling && f > 0.0 {
            return Ok(Proposal::Hold(CycleOutcome::PinnedCeiling));
        }
        if ratio_of(r.cutting_speed, r.descent_speed).is_none() {
            return Err(ControlError::Degenerate("cutting speed is zero"));
        }

        let (cm, dm) = self.multipliers(f, state.ratio.target_percent());
        state.accumulator.add(f * cm, f * dm);
        if !state.accumulator.should_emit() {
            return Ok(Proposal::Hold(CycleOutcome::Accumulating));
        }
        if !ctx.write_due {
            return Ok(Proposal::Hold(CycleOutcome::Paced));
        }

        let (dc, dd) = state.accumulator.take_whole_adjustment();
        let cutting = r.cutting_speed + dc as f64;
        let descent = r.descent_speed + dd as f64;
        let ratio_before = state.ratio.clone();
        state.ratio.check_and_update(cutting, ctx.now);
        match state.ratio.enforce_ratio(cutting, descent, direction(f)) {
            Ok((cutting_speed, descent_speed)) => Ok(Proposal::Command {
                command: SpeedCommand {
                    cutting_speed,
                    descent_speed,
                },
                taken: Some((dc, dd)),
            }),
            Err(e) => {
                state.accumulator.restore(dc, dd);
                state.ratio = ratio_before;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RatioCfg;
    use std::time::Duration;

    fn reading(cutting: f64, descent: f64) -> NormalizedReading {
        NormalizedReading {
            cutting_state: 3,
            cutting_speed: cutting,
            descent_speed: descent,
            motor_current_a: 25.0,
            ..NormalizedReading::default()
        }
    }

    fn ctx(r: &NormalizedReading, factor: f64, write_due: bool) -> CycleContext<'_> {
        CycleContext {
            reading: r,
            factor,
            now: Instant::now(),
            write_due,
        }
    }

    fn state() -> CorrectionState {
        CorrectionState::new(RatioCfg::default())
    }

    #[test]
    fn multipliers_follow_factor_sign() {
        let s = FuzzyAdaptive::new(ControlCfg::default());
        let (c, d) = s.multipliers(-1.0, 70.0);
        assert!((c - 0.049).abs() < 1e-12);
        assert!((d - 0.1).abs() < 1e-12);
        let (c, d) = s.multipliers(1.0, 70.0);
        assert!((c - 0.07).abs() < 1e-12);
        assert!((d - 0.07).abs() < 1e-12);
    }

    #[test]
    fn floor_pin_skips_accumulation() {
        let s = FuzzyAdaptive::new(ControlCfg::default());
        let mut st = state();
        let r = reading(60.0, 20.0);
        let p = s.evaluate(&ctx(&r, -2.0, true), &mut st).unwrap();
        assert_eq!(p, Proposal::Hold(CycleOutcome::PinnedFloor));
        assert!(st.accumulator.is_zero());
    }

    #[test]
    fn ceiling_pin_only_when_speeding_up() {
        let s = FuzzyAdaptive::new(ControlCfg::default());
        let mut st = state();
        let r = reading(100.0, 70.0);
        let p = s.evaluate(&ctx(&r, 1.0, true), &mut st).unwrap();
        assert_eq!(p, Proposal::Hold(CycleOutcome::PinnedCeiling));
        let p = s.evaluate(&ctx(&r, -1.0, true), &mut st).unwrap();
        assert_eq!(p, Proposal::Hold(CycleOutcome::Accumulating));
    }

    #[test]
    fn zero_cutting_speed_is_degenerate() {
        let s = FuzzyAdaptive::new(ControlCfg::default());
        let mut st = state();
        let r = reading(0.0, 30.0);
        assert!(matches!(
            s.evaluate(&ctx(&r, -1.0, true), &mut st),
            Err(ControlError::Degenerate(_))
        ));
    }

    #[test]
    fn pacing_keeps_adjustment_buffered() {
        let s = FuzzyAdaptive::new(ControlCfg::default());
        let mut st = state();
        let r = reading(70.0, 50.0);
        st.accumulator.add(0.0, -0.9);
        let p = s.evaluate(&ctx(&r, -2.0, false), &mut st).unwrap();
        assert_eq!(p, Proposal::Hold(CycleOutcome::Paced));
        assert!(st.accumulator.should_emit());
    }

    #[test]
    fn emitted_command_respects_ratio() {
        let s = FuzzyAdaptive::new(ControlCfg::default());
        let mut st = state();
        st.ratio.begin_cut(ratio_of(70.0, 50.0));
        st.accumulator.add(0.0, -0.9);
        let r = reading(70.0, 50.0);
        let Proposal::Command { command, taken } =
            s.evaluate(&ctx(&r, -2.0, true), &mut st).unwrap()
        else {
            panic!("expected a command");
        };
        assert_eq!(taken, Some((-1, -2)));
        assert!(command.descent_speed < 50.0);
        let ratio = ratio_of(command.cutting_speed, command.descent_speed).unwrap();
        assert!((ratio - st.ratio.target_percent()).abs() <= 1.0);
    }

    #[test]
    fn divergence_restores_adjustment() {
        let s = FuzzyAdaptive::new(ControlCfg::default());
        let mut st = CorrectionState::new(RatioCfg {
            max_iterations: 1,
            ..RatioCfg::default()
        });
        st.accumulator.add(0.0, 5.0);
        let r = reading(70.0, 30.0);
        let before = {
            let mut expected = st.accumulator;
            let (c, d) = s.multipliers(1.0, st.ratio.target_percent());
            expected.add(c, d);
            expected.remainder()
        };
        let err = s.evaluate(&ctx(&r, 1.0, true), &mut st).unwrap_err();
        assert_eq!(err, ControlError::RatioDiverged { iterations: 1 });
        let after = st.accumulator.remainder();
        assert!((after.0 - before.0).abs() < 1e-9);
        assert!((after.1 - before.1).abs() < 1e-9);
    }

    #[test]
    fn divergence_leaves_ratio_target_untouched() {
        let s = FuzzyAdaptive::new(ControlCfg::default());
        let mut st = CorrectionState::new(RatioCfg {
            max_iterations: 1,
            ..RatioCfg::default()
        });
        let t0 = Instant::now();
        st.ratio.check_and_update(60.0, t0);
        let target = st.ratio.target_percent();
        st.accumulator.add(0.0, 5.0);
        let r = reading(70.0, 30.0);
        // Far enough past the check interval, with enough drift, to nudge.
        let c = CycleContext {
            reading: &r,
            factor: 1.0,
            now: t0 + Duration::from_secs(2),
            write_due: true,
        };
        let err = s.evaluate(&c, &mut st).unwrap_err();
        assert_eq!(err, ControlError::RatioDiverged { iterations: 1 });
        assert_eq!(st.ratio.target_percent(), target);
        assert_eq!(st.ratio.baseline_speed(), Some(60.0));
    }
}
