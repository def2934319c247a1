//! The adaptive speed control loop.
//!
//! `ControlLoop` owns the bus, the clock and all correction state. One call
//! to `step` reads a frame, runs the active strategy and, when the strategy
//! proposes new speeds, writes both actuator registers. Nothing here is
//! shared with other threads except the `ModeSwitch`.
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use saw_config::ControlMode;
use saw_traits::{Clock, FieldBus};
use serde::Serialize;

use crate::bus_error::map_bus_error;
use crate::codec::{cutting_register_value, descent_register_value};
use crate::config::{BusCfg, ControlCfg, LinearCfg, RatioCfg};
use crate::accumulator::DeltaAccumulator;
use crate::cut_state::{CutStateDetector, CutTransition};
use crate::error::ControlError;
use crate::fuzzy::FuzzyEngine;
use crate::linear::{LinearInterpolated, SpeedTable};
use crate::ratio::{RatioTracker, ratio_of};
use crate::status::CycleOutcome;
use crate::strategy::{
    CycleContext, FuzzyAdaptive, Proposal, SpeedCommand, SpeedCorrectionStrategy,
};
use crate::units::{ColumnLayout, NormalizedReading, normalize};

// ── Mode switch ──────────────────────────────────────────────────────────────

/// Runtime-selectable control mode, shared with whoever drives the loop.
#[derive(Debug, Clone)]
pub struct ModeSwitch(Arc<AtomicU8>);

impl ModeSwitch {
    pub fn new(mode: ControlMode) -> Self {
        Self(Arc::new(AtomicU8::new(encode_mode(mode))))
    }

    pub fn get(&self) -> ControlMode {
        decode_mode(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, mode: ControlMode) {
        self.0.store(encode_mode(mode), Ordering::Release);
    }
}

impl Default for ModeSwitch {
    fn default() -> Self {
        Self::new(ControlMode::default())
    }
}

const fn encode_mode(mode: ControlMode) -> u8 {
    match mode {
        ControlMode::Off => 0,
        ControlMode::Fuzzy => 1,
        ControlMode::Linear => 2,
    }
}

const fn decode_mode(v: u8) -> ControlMode {
    match v {
        0 => ControlMode::Off,
        2 => ControlMode::Linear,
        _ => ControlMode::Fuzzy,
    }
}

// ── Correction state ─────────────────────────────────────────────────────────

/// Everything the loop carries from one cycle to the next.
#[derive(Debug, Clone)]
pub struct CorrectionState {
    pub previous_current_a: Option<f64>,
    pub previous_correction_factor: Option<f64>,
    pub accumulator: DeltaAccumulator,
    pub ratio: RatioTracker,
    pub last_actuator_write: Option<Instant>,
    pub cut: CutStateDetector,
}

impl CorrectionState {
    pub const fn new(ratio: RatioCfg) -> Self {
        Self {
            previous_current_a: None,
            previous_correction_factor: None,
            accumulator: DeltaAccumulator::new(),
            ratio: RatioTracker::new(ratio),
            last_actuator_write: None,
            cut: CutStateDetector::new(),
        }
    }
}

// ── Cycle record ─────────────────────────────────────────────────────────────

/// A reading annotated with what the loop did about it. This is what the
/// sinks receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleRecord {
    #[serde(flatten)]
    pub reading: NormalizedReading,
    pub mode: &'static str,
    pub outcome: CycleOutcome,
    pub correction_factor: Option<f64>,
    pub current_delta: Option<f64>,
    pub target_ratio_percent: f64,
    pub command: Option<SpeedCommand>,
}

const CSV_HEADER: [&str; 27] = [
    "timestamp_ms",
    "cutting_state",
    "alarm_status",
    "alarm_code",
    "head_height_mm",
    "motor_current_a",
    "motor_torque_percent",
    "descent_current_a",
    "clamp_pressure_bar",
    "band_tension_bar",
    "band_deviation",
    "ambient_temp_c",
    "ambient_humidity_percent",
    "coolant_temp_c",
    "hydraulic_oil_temp_c",
    "accel_x",
    "accel_y",
    "accel_z",
    "descent_speed",
    "cutting_speed",
    "mode",
    "outcome",
    "correction_factor",
    "current_delta",
    "target_ratio_percent",
    "command_cutting_speed",
    "command_descent_speed",
];

impl CycleRecord {
    pub const fn csv_header() -> &'static [&'static str] {
        &CSV_HEADER
    }

    /// One CSV row in `csv_header` order; absent values are empty.
    pub fn csv_fields(&self) -> Vec<String> {
        let r = &self.reading;
        let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        vec![
            r.timestamp_ms.to_string(),
            r.cutting_state.to_string(),
            r.alarm_status.to_string(),
            r.alarm_code.clone(),
            r.head_height_mm.to_string(),
            r.motor_current_a.to_string(),
            r.motor_torque_percent.to_string(),
            r.descent_current_a.to_string(),
            r.clamp_pressure_bar.to_string(),
            r.band_tension_bar.to_string(),
            r.band_deviation.to_string(),
            r.ambient_temp_c.to_string(),
            r.ambient_humidity_percent.to_string(),
            r.coolant_temp_c.to_string(),
            r.hydraulic_oil_temp_c.to_string(),
            r.accel_x.to_string(),
            r.accel_y.to_string(),
            r.accel_z.to_string(),
            r.descent_speed.to_string(),
            r.cutting_speed.to_string(),
            self.mode.to_string(),
            self.outcome.as_str().to_string(),
            opt(self.correction_factor),
            opt(self.current_delta),
            self.target_ratio_percent.to_string(),
            opt(self.command.map(|c| c.cutting_speed)),
            opt(self.command.map(|c| c.descent_speed)),
        ]
    }
}

// ── Control loop ─────────────────────────────────────────────────────────────

/// A speed command the bus refused part-way through.
struct WriteFailure {
    error: ControlError,
    /// The cutting register was already written when the descent write failed.
    cutting_written: bool,
}

/// Build with `ControlLoopBuilder`.
pub struct ControlLoop {
    pub(crate) bus: Box<dyn FieldBus + Send>,
    pub(crate) clock: Box<dyn Clock + Send>,
    pub(crate) layout: ColumnLayout,
    pub(crate) bus_cfg: BusCfg,
    pub(crate) control: ControlCfg,
    pub(crate) linear: LinearCfg,
    pub(crate) engine: Arc<FuzzyEngine>,
    pub(crate) table: Arc<SpeedTable>,
    pub(crate) mode: ModeSwitch,
    pub(crate) active_mode: ControlMode,
    pub(crate) strategy: Option<Box<dyn SpeedCorrectionStrategy>>,
    pub(crate) state: CorrectionState,
}

impl core::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("mode", &self.active_mode)
            .field("columns", &self.layout.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

pub(crate) fn make_strategy(
    mode: ControlMode,
    control: &ControlCfg,
    table: &Arc<SpeedTable>,
    linear: &LinearCfg,
) -> Option<Box<dyn SpeedCorrectionStrategy>> {
    match mode {
        ControlMode::Off => None,
        ControlMode::Fuzzy => Some(Box::new(FuzzyAdaptive::new(control.clone()))),
        ControlMode::Linear => Some(Box::new(LinearInterpolated::new(
            Arc::clone(table),
            linear.clone(),
        ))),
    }
}

impl ControlLoop {
    pub const fn state(&self) -> &CorrectionState {
        &self.state
    }

    pub fn mode_switch(&self) -> ModeSwitch {
        self.mode.clone()
    }

    pub const fn active_mode(&self) -> ControlMode {
        self.active_mode
    }

    pub const fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    pub const fn control_cfg(&self) -> &ControlCfg {
        &self.control
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn engine(&self) -> &FuzzyEngine {
        &self.engine
    }

    pub fn is_connected(&self) -> bool {
        self.bus.is_connected()
    }

    pub fn reconnect(&mut self) -> Result<(), ControlError> {
        self.bus.reconnect().map_err(|e| map_bus_error(&*e))
    }

    /// Read one frame from the bus and process it.
    pub fn step(&mut self) -> Result<CycleRecord, ControlError> {
        let count = u16::try_from(self.layout.len())
            .map_err(|_| ControlError::Config("layout wider than a register count".into()))?;
        let frame = self
            .bus
            .read_holding_registers(self.bus_cfg.start_address, count)
            .map_err(|e| map_bus_error(&*e))?;
        tracing::trace!(?frame, "frame read");
        self.step_from_raw(&frame)
    }

    /// Process a frame that was read elsewhere.
    pub fn step_from_raw(&mut self, frame: &[u16]) -> Result<CycleRecord, ControlError> {
        let now = self.clock.now();
        let mut reading = normalize(&self.layout, frame, self.clock.unix_ms())?;
        self.sync_mode();
        self.track_cut(&reading, now);

        let current = reading.motor_current_a;
        let delta = self
            .state
            .previous_current_a
            .map_or(0.0, |prev| current - prev);
        self.state.previous_current_a = Some(current);

        if !self.state.cut.is_cutting() {
            return Ok(self.record(reading, CycleOutcome::Idle, None, Some(delta), None));
        }
        let Some(strategy) = self.strategy.as_ref() else {
            return Ok(self.record(reading, CycleOutcome::Disabled, None, Some(delta), None));
        };

        let factor = self.engine.infer(current, delta);
        self.state.previous_correction_factor = Some(factor);
        tracing::debug!(current, delta, factor, "correction factor");

        if self.state.cut.in_settling(now, self.control.settle) {
            return Ok(self.record(
                reading,
                CycleOutcome::Settling,
                Some(factor),
                Some(delta),
                None,
            ));
        }

        let write_due = self
            .state
            .last_actuator_write
            .is_none_or(|t| now.saturating_duration_since(t) >= self.control.speed_adjustment_interval);
        let ctx = CycleContext {
            reading: &reading,
            factor,
            now,
            write_due,
        };

        let ratio_before = self.state.ratio.clone();
        let (outcome, command) = match strategy.evaluate(&ctx, &mut self.state) {
            Ok(Proposal::Hold(outcome)) => (outcome, None),
            Ok(Proposal::Command { command, taken }) => {
                if let Err(failure) = self.write_command(&command) {
                    // Only the channels the machine never saw go back.
                    if let Some((c, d)) = taken {
                        let c = if failure.cutting_written { 0 } else { c };
                        self.state.accumulator.restore(c, d);
                    }
                    self.state.ratio = ratio_before;
                    return Err(failure.error);
                }
                self.state.last_actuator_write = Some(now);
                tracing::info!(
                    cutting = command.cutting_speed,
                    descent = command.descent_speed,
                    "speeds written"
                );
                (CycleOutcome::Written, Some(command))
            }
            Err(ControlError::Degenerate(why)) => {
                tracing::warn!(reason = why, "correction skipped");
                (CycleOutcome::Degenerate, None)
            }
            Err(ControlError::RatioDiverged { iterations }) => {
                tracing::warn!(iterations, "ratio enforcement diverged; write aborted");
                (CycleOutcome::RatioDiverged, None)
            }
            Err(e) => return Err(e),
        };
        if outcome == CycleOutcome::PinnedFloor {
            reading.descent_speed = self.control.descent_floor;
        }
        Ok(self.record(reading, outcome, Some(factor), Some(delta), command))
    }

    /// Cutting register first, then the sign-packed descent register.
    fn write_command(&mut self, command: &SpeedCommand) -> Result<(), WriteFailure> {
        let cutting = cutting_register_value(command.cutting_speed);
        let descent = descent_register_value(command.descent_speed);
        self.bus
            .write_register(self.bus_cfg.cutting_register, cutting)
            .map_err(|e| WriteFailure {
                error: map_bus_error(&*e),
                cutting_written: false,
            })?;
        self.bus
            .write_register(self.bus_cfg.descent_register, descent)
            .map_err(|e| WriteFailure {
                error: map_bus_error(&*e),
                cutting_written: true,
            })?;
        Ok(())
    }

    fn sync_mode(&mut self) {
        let wanted = self.mode.get();
        if wanted == self.active_mode {
            return;
        }
        tracing::info!(
            from = self.active_mode.as_str(),
            to = wanted.as_str(),
            "control mode switched"
        );
        self.strategy = make_strategy(wanted, &self.control, &self.table, &self.linear);
        self.active_mode = wanted;
        self.state.accumulator.reset();
    }

    fn track_cut(&mut self, reading: &NormalizedReading, now: Instant) {
        let observed = ratio_of(reading.cutting_speed, reading.descent_speed);
        match self.state.cut.update(reading.cutting_state, now) {
            Some(CutTransition::Started) => {
                self.state.ratio.begin_cut(observed);
                self.state.accumulator.reset();
                tracing::info!(
                    height_mm = reading.head_height_mm,
                    target_ratio_percent = self.state.ratio.target_percent(),
                    "cut started"
                );
            }
            Some(CutTransition::Stopped) => {
                self.state.ratio.end_cut(observed);
                self.state.accumulator.reset();
                tracing::info!(height_mm = reading.head_height_mm, "cut stopped");
            }
            None => {}
        }
    }

    fn record(
        &self,
        reading: NormalizedReading,
        outcome: CycleOutcome,
        correction_factor: Option<f64>,
        current_delta: Option<f64>,
        command: Option<SpeedCommand>,
    ) -> CycleRecord {
        CycleRecord {
            reading,
            mode: self.active_mode.as_str(),
            outcome,
            correction_factor,
            current_delta,
            target_ratio_percent: self.state.ratio.target_percent(),
            command,
        }
    }
}
