//! Builder for `ControlLoop`.
//!
//! Everything except the bus has a default. `build()` validates the runtime
//! configuration; `from_config` maps a loaded `saw_config::Config` onto the
//! builder, including the optional speed-table CSV.

use std::path::Path;
use std::sync::Arc;

use saw_config::ControlMode;
use saw_traits::clock::{Clock, MonotonicClock};
use saw_traits::FieldBus;

use crate::config::{BusCfg, ControlCfg, LinearCfg, RatioCfg};
use crate::control::{ControlLoop, CorrectionState, ModeSwitch, make_strategy};
use crate::error::{BuildError, Result};
use crate::fuzzy::FuzzyEngine;
use crate::linear::SpeedTable;
use crate::units::ColumnLayout;

#[derive(Default)]
pub struct ControlLoopBuilder {
    bus: Option<Box<dyn FieldBus + Send>>,
    clock: Option<Box<dyn Clock + Send>>,
    layout: Option<ColumnLayout>,
    bus_cfg: Option<BusCfg>,
    control: Option<ControlCfg>,
    ratio: Option<RatioCfg>,
    linear: Option<LinearCfg>,
    engine: Option<Arc<FuzzyEngine>>,
    table: Option<Arc<SpeedTable>>,
    mode: Option<ModeSwitch>,
}

impl std::fmt::Debug for ControlLoopBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoopBuilder")
            .field("bus", &self.bus.is_some())
            .field("clock", &self.clock.is_some())
            .field("layout", &self.layout)
            .field("bus_cfg", &self.bus_cfg)
            .field("control", &self.control)
            .field("ratio", &self.ratio)
            .field("linear", &self.linear)
            .field("engine", &self.engine)
            .field("table", &self.table)
            .field("mode", &self.mode)
            .finish()
    }
}

fn invalid(msg: impl Into<String>) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg.into()))
}

impl ControlLoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-filled from a validated `Config`.
    ///
    /// `base_dir` resolves a relative `linear.table_csv` path.
    pub fn from_config(cfg: &saw_config::Config, base_dir: Option<&Path>) -> Result<Self> {
        let layout = ColumnLayout::new(cfg.layout.columns.clone()).map_err(eyre::Report::new)?;
        let mut b = Self::new()
            .layout(layout)
            .bus_cfg(BusCfg::from(&cfg.fieldbus))
            .control(ControlCfg::from(&cfg.control))
            .ratio(RatioCfg::from(&cfg.ratio))
            .linear(LinearCfg::from(&cfg.linear))
            .engine(FuzzyEngine::from(&cfg.fuzzy))
            .mode(ModeSwitch::new(cfg.control.mode));

        if let Some(csv) = &cfg.linear.table_csv {
            let path = match base_dir {
                Some(dir) if Path::new(csv).is_relative() => dir.join(csv),
                _ => Path::new(csv).to_path_buf(),
            };
            let rows = saw_config::load_speed_table_csv(&path)?;
            let table = SpeedTable::from_rows(&rows).map_err(eyre::Report::new)?;
            tracing::info!(path = %path.display(), rows = rows.len(), "speed table loaded");
            b = b.table(table);
        }
        Ok(b)
    }

    pub fn with_bus(mut self, bus: impl FieldBus + Send + 'static) -> Self {
        self.bus = Some(Box::new(bus));
        self
    }

    pub fn with_boxed_bus(mut self, bus: Box<dyn FieldBus + Send>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    pub fn layout(mut self, layout: ColumnLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn bus_cfg(mut self, cfg: BusCfg) -> Self {
        self.bus_cfg = Some(cfg);
        self
    }

    pub fn control(mut self, cfg: ControlCfg) -> Self {
        self.control = Some(cfg);
        self
    }

    pub fn ratio(mut self, cfg: RatioCfg) -> Self {
        self.ratio = Some(cfg);
        self
    }

    pub fn linear(mut self, cfg: LinearCfg) -> Self {
        self.linear = Some(cfg);
        self
    }

    pub fn engine(mut self, engine: FuzzyEngine) -> Self {
        self.engine = Some(Arc::new(engine));
        self
    }

    pub fn table(mut self, table: SpeedTable) -> Self {
        self.table = Some(Arc::new(table));
        self
    }

    /// Share a mode switch with the caller so the mode can change while the
    /// loop runs.
    pub fn mode(mut self, mode: ModeSwitch) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn initial_mode(self, mode: ControlMode) -> Self {
        self.mode(ModeSwitch::new(mode))
    }

    pub fn build(self) -> Result<ControlLoop> {
        let bus = self.bus.ok_or_else(|| eyre::Report::new(BuildError::MissingBus))?;
        let control = self.control.unwrap_or_default();
        let ratio = self.ratio.unwrap_or_default();
        let linear = self.linear.unwrap_or_default();

        // ── Validation ───────────────────────────────────────────────────────
        if !(control.descent_gain.is_finite() && control.descent_gain > 0.0) {
            return Err(invalid("descent_gain must be > 0"));
        }
        if !(control.cutting_gain_scale.is_finite() && control.cutting_gain_scale > 0.0) {
            return Err(invalid("cutting_gain_scale must be > 0"));
        }
        if control.descent_floor >= control.cutting_ceiling {
            return Err(invalid("descent_floor must be below cutting_ceiling"));
        }
        if !(ratio.step.is_finite() && ratio.step > 0.0) {
            return Err(invalid("ratio step must be > 0"));
        }
        if !(ratio.tolerance_percent.is_finite() && ratio.tolerance_percent > 0.0) {
            return Err(invalid("ratio tolerance must be > 0"));
        }
        if ratio.max_iterations == 0 {
            return Err(invalid("ratio max_iterations must be >= 1"));
        }
        if !(linear.min_speed.is_finite() && linear.max_speed.is_finite())
            || linear.min_speed > linear.max_speed
        {
            return Err(invalid("linear min_speed must not exceed max_speed"));
        }

        let table = self.table.unwrap_or_else(|| Arc::new(SpeedTable::standard()));
        let mode = self.mode.unwrap_or_default();
        let active_mode = mode.get();
        let strategy = make_strategy(active_mode, &control, &table, &linear);

        Ok(ControlLoop {
            bus,
            clock: self
                .clock
                .unwrap_or_else(|| Box::new(MonotonicClock::new())),
            layout: self.layout.unwrap_or_else(ColumnLayout::standard),
            bus_cfg: self.bus_cfg.unwrap_or_default(),
            engine: self
                .engine
                .unwrap_or_else(|| Arc::new(FuzzyEngine::canonical())),
            table,
            mode,
            active_mode,
            strategy,
            state: CorrectionState::new(ratio),
            control,
            linear,
        })
    }
}

impl ControlLoop {
    pub fn builder() -> ControlLoopBuilder {
        ControlLoopBuilder::new()
    }
}
