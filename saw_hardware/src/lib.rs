#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Field-bus backends for the band-saw controller.
//!
//! - `ModbusTcp`: synchronous Modbus TCP client for the real machine.
//! - `SimulatedSaw`: in-process plant model used by `--sim` runs and tests.
pub mod error;
pub mod modbus;
pub mod sim;

pub use error::HwError;
pub use modbus::ModbusTcp;
pub use sim::{SimHandle, SimProfile, SimulatedSaw};
