//! Maps `Box<dyn Error>` from the `FieldBus` boundary to typed `ControlError`.
//!
//! `saw_traits::FieldBus` returns boxed errors so any transport can plug in;
//! this module converts them, with a feature-gated path that downcasts
//! `saw_hardware::HwError` precisely.

use crate::error::ControlError;

/// Map a trait-boundary error to a typed `ControlError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_bus_error(e: &(dyn std::error::Error + 'static)) -> ControlError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<saw_hardware::HwError>() {
            return match hw {
                saw_hardware::HwError::Timeout => ControlError::Timeout,
                other => ControlError::Transport(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        ControlError::Timeout
    } else {
        ControlError::Transport(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_heuristic_detects_timeouts() {
        let e = std::io::Error::other("operation timed out");
        assert_eq!(map_bus_error(&e), ControlError::Timeout);
    }

    #[test]
    fn other_errors_are_transport_faults() {
        let e = std::io::Error::other("connection refused");
        assert!(matches!(map_bus_error(&e), ControlError::Transport(m) if m.contains("refused")));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn downcasts_hardware_errors() {
        let e = saw_hardware::HwError::Timeout;
        assert_eq!(map_bus_error(&e), ControlError::Timeout);
        let e = saw_hardware::HwError::Disconnected;
        assert!(matches!(map_bus_error(&e), ControlError::Transport(_)));
    }
}
