//! Hardware-facing traits shared by the saw control stack.
//!
//! The control loop only ever talks to the machine through `FieldBus`; the
//! Modbus TCP client and the in-process simulator both implement it.
pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Boxed error type used at every trait boundary in this crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Register-oriented access to the saw controller.
///
/// Addresses are zero-based holding-register offsets as configured on the
/// controller side.
pub trait FieldBus {
    /// Read `count` consecutive holding registers starting at `start`.
    fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, BoxError>;

    /// Write a single holding register.
    fn write_register(&mut self, address: u16, value: u16) -> Result<(), BoxError>;

    /// Whether the link is currently believed to be up.
    fn is_connected(&self) -> bool {
        true
    }

    /// Re-establish the link after a transport fault.
    fn reconnect(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<T: FieldBus + ?Sized> FieldBus for Box<T> {
    fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, BoxError> {
        (**self).read_holding_registers(start, count)
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), BoxError> {
        (**self).write_register(address, value)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn reconnect(&mut self) -> Result<(), BoxError> {
        (**self).reconnect()
    }
}
