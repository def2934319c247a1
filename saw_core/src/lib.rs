#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Adaptive speed control for a band saw (hardware-agnostic).
//!
//! The machine is reached only through `saw_traits::FieldBus`; time only
//! through `saw_traits::Clock`.
//!
//! ## Architecture
//!
//! - **Units**: raw register frame to `NormalizedReading` (`units`)
//! - **Codec**: speeds back to register values, descent sign packing (`codec`)
//! - **Fuzzy**: current and current change to a correction factor (`fuzzy`)
//! - **Accumulator / Ratio**: fractional buffering and ratio enforcement
//! - **Strategies**: `FuzzyAdaptive` and `LinearInterpolated` (`strategy`, `linear`)
//! - **Control**: one cycle of read, decide, write (`control::ControlLoop`)
//! - **Runner / Sinks**: the outer loop and the worker-thread record sinks
//!
//! ## Register conventions
//!
//! Cutting speed is written as a plain count (`speed / 0.0754`). Descent
//! speed is written as `speed / -0.06 + 65535` with bit 15 **set** for
//! non-negative values; see `codec::pack_signed`.

pub mod accumulator;
pub mod builder;
pub mod bus_error;
pub mod codec;
pub mod config;
pub mod control;
pub mod conversions;
pub mod cut_state;
pub mod error;
pub mod fuzzy;
pub mod linear;
pub mod mocks;
pub mod ratio;
pub mod retry;
pub mod runner;
pub mod sink;
pub mod status;
pub mod strategy;
pub mod units;

pub use accumulator::DeltaAccumulator;
pub use builder::ControlLoopBuilder;
pub use codec::{CUTTING_SPEED_REGISTER, DESCENT_SPEED_REGISTER, SpeedChannel};
pub use config::{BusCfg, ControlCfg, LinearCfg, RatioCfg};
pub use control::{ControlLoop, CorrectionState, CycleRecord, ModeSwitch};
pub use cut_state::{CutStateDetector, CutTransition};
pub use error::{BuildError, ControlError, Result};
pub use fuzzy::FuzzyEngine;
pub use linear::{LinearInterpolated, SpeedTable};
pub use ratio::RatioTracker;
pub use retry::RetryPolicy;
pub use runner::{RunOptions, RunStats, run};
pub use saw_config::ControlMode;
pub use sink::{CsvRowStore, JsonLinesPublisher, RecentHistory, RecordSink, SinkSet, SinkWorker};
pub use status::CycleOutcome;
pub use strategy::{CycleContext, FuzzyAdaptive, Proposal, SpeedCommand, SpeedCorrectionStrategy};
pub use units::{Channel, ColumnLayout, CuttingState, NormalizedReading, normalize};
