use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("bus timeout")]
    Timeout,
    #[error("bus not connected")]
    Disconnected,
    #[error("modbus exception code {code:#04x} for function {function:#04x}")]
    Exception { function: u8, code: u8 },
    #[error("modbus protocol error: {0}")]
    Protocol(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl HwError {
    /// Errors after which the TCP stream can no longer be trusted.
    pub fn breaks_link(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Disconnected | Self::Io(_) | Self::Protocol(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HwError>;
