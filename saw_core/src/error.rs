use thiserror::Error;

/// Faults raised by one control cycle. None of these end the control loop.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("transport fault: {0}")]
    Transport(String),
    #[error("bus timeout")]
    Timeout,
    #[error("malformed reading: expected {expected} registers, got {got}")]
    Malformed { expected: usize, got: usize },
    #[error("degenerate control input: {0}")]
    Degenerate(&'static str),
    #[error("ratio enforcement did not converge after {iterations} iterations")]
    RatioDiverged { iterations: u32 },
    #[error("configuration error: {0}")]
    Config(String),
}

impl ControlError {
    /// Faults recovered by backing off and retrying the bus.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing field bus")]
    MissingBus,
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
