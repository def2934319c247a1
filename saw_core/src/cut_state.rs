use std::time::{Duration, Instant};

use crate::units::CuttingState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutTransition {
    Started,
    Stopped,
}

/// Tracks the machine's idle/cutting status and when the current cut began.
#[derive(Debug, Clone, Default)]
pub struct CutStateDetector {
    cutting: bool,
    started_at: Option<Instant>,
}

impl CutStateDetector {
    pub const fn new() -> Self {
        Self {
            cutting: false,
            started_at: None,
        }
    }

    pub fn update(&mut self, code: u16, now: Instant) -> Option<CutTransition> {
        let cutting = CuttingState::from_code(code) == CuttingState::Cutting;
        match (self.cutting, cutting) {
            (false, true) => {
                self.cutting = true;
                self.started_at = Some(now);
                Some(CutTransition::Started)
            }
            (true, false) => {
                self.cutting = false;
                self.started_at = None;
                Some(CutTransition::Stopped)
            }
            _ => None,
        }
    }

    pub const fn is_cutting(&self) -> bool {
        self.cutting
    }

    pub const fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// True while less than `settle` has passed since the cut started.
    pub fn in_settling(&self, now: Instant, settle: Duration) -> bool {
        self.started_at
            .is_some_and(|t| now.saturating_duration_since(t) < settle)
    }
}
