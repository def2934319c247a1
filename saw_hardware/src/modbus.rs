//! Modbus TCP client for the saw controller, on `tokio-modbus`'s sync client.
//!
//! Only holding-register reads (0x03) and single-register writes (0x06) are
//! used. A transport or protocol fault drops the context; an exception reply
//! keeps it. The owner decides when to call `reconnect`.
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use saw_traits::{BoxError, FieldBus};
use tokio_modbus::client::sync::{self, Context, Reader, Writer};
use tokio_modbus::{ExceptionCode, Slave};

use crate::error::{HwError, Result};

pub const FC_READ_HOLDING: u8 = 0x03;
pub const FC_WRITE_SINGLE: u8 = 0x06;
/// Protocol limit for a single 0x03 request.
pub const MAX_READ_COUNT: u16 = 125;

pub struct ModbusTcp {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
    ctx: Option<Context>,
}

impl ModbusTcp {
    /// Create an unconnected client; call `reconnect` (or use `connect`) before I/O.
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            timeout,
            ctx: None,
        }
    }

    pub fn connect(host: impl Into<String>, port: u16, unit_id: u8, timeout: Duration) -> Result<Self> {
        let mut c = Self::new(host, port, unit_id, timeout);
        c.open()?;
        Ok(c)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| HwError::Protocol(format!("no address resolved for {}", self.endpoint())))
    }

    fn open(&mut self) -> Result<()> {
        self.ctx = None;
        let addr = self.resolve()?;
        let ctx = sync::tcp::connect_slave_with_timeout(addr, Slave(self.unit_id), Some(self.timeout))
            .map_err(map_io)?;
        tracing::info!(endpoint = %self.endpoint(), unit_id = self.unit_id, "modbus connected");
        self.ctx = Some(ctx);
        Ok(())
    }

    /// Run one request, dropping the context when the link can't be trusted.
    fn call<T>(
        &mut self,
        function: u8,
        f: impl FnOnce(&mut Context) -> tokio_modbus::Result<T>,
    ) -> Result<T> {
        let ctx = self.ctx.as_mut().ok_or(HwError::Disconnected)?;
        let result = map_response(function, f(ctx));
        if result.as_ref().is_err_and(HwError::breaks_link) {
            tracing::warn!(endpoint = %self.endpoint(), "modbus link dropped");
            self.ctx = None;
        }
        result
    }
}

fn map_io(e: std::io::Error) -> HwError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => HwError::Timeout,
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected => HwError::Disconnected,
        _ => HwError::Io(e),
    }
}

/// Flatten `tokio-modbus`'s nested result into `HwError`.
pub fn map_response<T>(function: u8, r: tokio_modbus::Result<T>) -> Result<T> {
    match r {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(code)) => Err(exception(function, code)),
        Err(tokio_modbus::Error::Transport(e)) => Err(map_io(e)),
        Err(other) => Err(HwError::Protocol(other.to_string())),
    }
}

fn exception(function: u8, code: ExceptionCode) -> HwError {
    HwError::Exception {
        function,
        code: u8::from(code),
    }
}

impl FieldBus for ModbusTcp {
    fn read_holding_registers(&mut self, start: u16, count: u16) -> std::result::Result<Vec<u16>, BoxError> {
        if count == 0 || count > MAX_READ_COUNT {
            return Err(Box::new(HwError::Protocol(format!(
                "register count {count} outside 1..={MAX_READ_COUNT}"
            ))));
        }
        let regs = self.call(FC_READ_HOLDING, |ctx| ctx.read_holding_registers(start, count))?;
        if regs.len() != usize::from(count) {
            return Err(Box::new(HwError::Protocol(format!(
                "expected {count} registers, got {}",
                regs.len()
            ))));
        }
        Ok(regs)
    }

    fn write_register(&mut self, address: u16, value: u16) -> std::result::Result<(), BoxError> {
        self.call(FC_WRITE_SINGLE, |ctx| ctx.write_single_register(address, value))?;
        tracing::debug!(address, value, "register written");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    fn reconnect(&mut self) -> std::result::Result<(), BoxError> {
        Ok(self.open()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_reply_is_typed_and_keeps_link() {
        let err = map_response::<()>(FC_READ_HOLDING, Ok(Err(ExceptionCode::IllegalDataAddress)))
            .unwrap_err();
        assert!(matches!(
            err,
            HwError::Exception {
                function: 0x03,
                code: 0x02
            }
        ));
        assert!(!err.breaks_link());
    }

    #[test]
    fn transport_timeout_maps_to_timeout() {
        let io = std::io::Error::new(ErrorKind::TimedOut, "deadline");
        let err = map_response::<()>(FC_WRITE_SINGLE, Err(tokio_modbus::Error::Transport(io)))
            .unwrap_err();
        assert!(matches!(err, HwError::Timeout));
        assert!(err.breaks_link());
    }

    #[test]
    fn unconnected_client_reports_disconnected() {
        let mut c = ModbusTcp::new("127.0.0.1", 1, 1, Duration::from_millis(10));
        assert!(!c.is_connected());
        let err = c.read_holding_registers(0, 1).unwrap_err();
        let hw = err.downcast_ref::<HwError>().unwrap();
        assert!(matches!(hw, HwError::Disconnected));
    }

    #[test]
    fn oversized_read_is_rejected_before_io() {
        let mut c = ModbusTcp::new("127.0.0.1", 1, 1, Duration::from_millis(10));
        let err = c.read_holding_registers(0, MAX_READ_COUNT + 1).unwrap_err();
        assert!(matches!(err.downcast_ref::<HwError>(), Some(HwError::Protocol(_))));
    }
}
