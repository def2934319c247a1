//! Height-interpolated speed schedule.
//!
//! A non-adaptive alternative to the fuzzy strategy: target speeds are a
//! function of head height only, scaled and clamped.
use saw_config::{ControlMode, SpeedTableRow, validate_speed_table};
use std::sync::Arc;

use crate::config::LinearCfg;
use crate::control::CorrectionState;
use crate::error::{BuildError, ControlError};
use crate::status::CycleOutcome;
use crate::strategy::{CycleContext, Proposal, SpeedCommand, SpeedCorrectionStrategy};

/// `[height_mm, cutting_speed, descent_speed]`, top of stroke first.
const STANDARD_ROWS: [[f64; 3]; 31] = [
    [300.0, 78.0, 55.0],
    [290.0, 76.0, 52.0],
    [280.0, 74.0, 45.0],
    [270.0, 72.0, 42.0],
    [260.0, 70.0, 36.0],
    [250.0, 69.0, 33.0],
    [240.0, 68.0, 30.0],
    [230.0, 68.0, 28.5],
    [220.0, 67.0, 27.0],
    [210.0, 66.0, 25.5],
    [200.0, 66.0, 24.8],
    [190.0, 66.0, 24.2],
    [180.0, 65.0, 23.6],
    [170.0, 65.0, 23.6],
    [160.0, 65.0, 23.4],
    [150.0, 65.0, 23.4],
    [140.0, 65.0, 23.4],
    [130.0, 65.0, 23.6],
    [120.0, 65.0, 23.6],
    [110.0, 66.0, 24.2],
    [100.0, 66.0, 24.8],
    [90.0, 66.0, 25.5],
    [80.0, 67.0, 27.0],
    [70.0, 68.0, 28.5],
    [60.0, 68.0, 30.0],
    [50.0, 69.0, 33.0],
    [40.0, 70.0, 36.0],
    [30.0, 72.0, 42.0],
    [20.0, 74.0, 45.0],
    [10.0, 76.0, 52.0],
    [0.0, 78.0, 55.0],
];

/// Breakpoints sorted by ascending height.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedTable {
    rows: Vec<SpeedTableRow>,
}

impl SpeedTable {
    pub fn standard() -> Self {
        let mut rows: Vec<SpeedTableRow> = STANDARD_ROWS
            .iter()
            .map(|&[height_mm, cutting_speed, descent_speed]| SpeedTableRow {
                height_mm,
                cutting_speed,
                descent_speed,
            })
            .collect();
        rows.reverse();
        Self { rows }
    }

    /// Build from rows with strictly monotonic heights in either direction.
    pub fn from_rows(rows: &[SpeedTableRow]) -> Result<Self, BuildError> {
        validate_speed_table(rows).map_err(|e| BuildError::InvalidConfig(e.to_string()))?;
        let mut rows = rows.to_vec();
        if rows[0].height_mm > rows[rows.len() - 1].height_mm {
            rows.reverse();
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[SpeedTableRow] {
        &self.rows
    }

    /// `(cutting, descent)` at `height_mm`, clamped to the end rows outside
    /// the table. A non-finite height reads as the lowest row.
    pub fn interpolate(&self, height_mm: f64) -> (f64, f64) {
        let lo = self.rows[0];
        let hi = self.rows[self.rows.len() - 1];
        if !height_mm.is_finite() || height_mm <= lo.height_mm {
            return (lo.cutting_speed, lo.descent_speed);
        }
        if height_mm >= hi.height_mm {
            return (hi.cutting_speed, hi.descent_speed);
        }
        // First row strictly above `height_mm`; always in 1..len here.
        let i = self.rows.partition_point(|r| r.height_mm <= height_mm);
        let (a, b) = (self.rows[i - 1], self.rows[i]);
        let t = (height_mm - a.height_mm) / (b.height_mm - a.height_mm);
        (
            a.cutting_speed + t * (b.cutting_speed - a.cutting_speed),
            a.descent_speed + t * (b.descent_speed - a.descent_speed),
        )
    }
}

impl Default for SpeedTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Writes the scheduled speeds for the current head height every time the
/// pacing interval allows.
#[derive(Debug, Clone)]
pub struct LinearInterpolated {
    table: Arc<SpeedTable>,
    cfg: LinearCfg,
}

impl LinearInterpolated {
    pub const fn new(table: Arc<SpeedTable>, cfg: LinearCfg) -> Self {
        Self { table, cfg }
    }

    pub fn command_for_height(&self, height_mm: f64) -> SpeedCommand {
        let (c, d) = self.table.interpolate(height_mm);
        let clamp = |v: f64| (v * self.cfg.multiplier).clamp(self.cfg.min_speed, self.cfg.max_speed);
        SpeedCommand {
            cutting_speed: clamp(c),
            descent_speed: clamp(d),
        }
    }
}

impl SpeedCorrectionStrategy for LinearInterpolated {
    fn mode(&self) -> ControlMode {
        ControlMode::Linear
    }

    fn evaluate(
        &self,
        ctx: &CycleContext<'_>,
        _state: &mut CorrectionState,
    ) -> Result<Proposal, ControlError> {
        if !ctx.write_due {
            return Ok(Proposal::Hold(CycleOutcome::Paced));
        }
        Ok(Proposal::Command {
            command: self.command_for_height(ctx.reading.head_height_mm),
            taken: None,
        })
    }
}
