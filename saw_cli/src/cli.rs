//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use saw_config::ControlMode;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "saw", version, about = "Band-saw adaptive speed control")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/saw_config.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Speed-correction mode selectable on the command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    /// Observe and record only; never write speeds
    Off,
    /// Fuzzy correction from motor current
    Fuzzy,
    /// Speeds interpolated from head height
    Linear,
}

impl From<ModeArg> for ControlMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Off => Self::Off,
            ModeArg::Fuzzy => Self::Fuzzy,
            ModeArg::Linear => Self::Linear,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control loop until Ctrl-C (or --max-cycles)
    Run {
        /// Drive the in-process simulated saw instead of the Modbus endpoint
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
        /// Override control.mode from the config
        #[arg(long, value_enum, value_name = "MODE")]
        mode: Option<ModeArg>,
        /// Stop after this many cycles
        #[arg(long, value_name = "N")]
        max_cycles: Option<u64>,
        /// Print loop statistics on exit
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
    },
    /// Read one frame and print the normalized reading
    SelfCheck {
        /// Read from the simulated saw
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
    },
    /// Evaluate the fuzzy controller for one current/change pair
    Infer {
        /// Motor current (A)
        #[arg(long, allow_hyphen_values = true)]
        current: f64,
        /// Change in motor current since the previous cycle (A)
        #[arg(long, allow_hyphen_values = true)]
        delta: f64,
    },
    /// Validate the config and print a summary
    Health,
}
