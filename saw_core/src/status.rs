//! Outcome reported for each control cycle.
use serde::Serialize;

/// What one pass of the control loop did with its reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Machine not cutting.
    Idle,
    /// Control mode is off; reading forwarded only.
    Disabled,
    /// Inside the post-start settling window; factor measured, not applied.
    Settling,
    /// Correction buffered, below the emit threshold.
    Accumulating,
    /// Descent at or below the floor while the factor asks to slow down.
    PinnedFloor,
    /// Cutting at or above the ceiling while the factor asks to speed up.
    PinnedCeiling,
    /// A write was ready but the last one was too recent.
    Paced,
    /// Ratio undefined for this reading; correction skipped.
    Degenerate,
    /// Ratio enforcement hit its iteration bound; write aborted.
    RatioDiverged,
    /// New speeds written to the actuator.
    Written,
}

impl CycleOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Disabled => "disabled",
            Self::Settling => "settling",
            Self::Accumulating => "accumulating",
            Self::PinnedFloor => "pinned_floor",
            Self::PinnedCeiling => "pinned_ceiling",
            Self::Paced => "paced",
            Self::Degenerate => "degenerate",
            Self::RatioDiverged => "ratio_diverged",
            Self::Written => "written",
        }
    }

    pub const fn wrote(self) -> bool {
        matches!(self, Self::Written)
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
