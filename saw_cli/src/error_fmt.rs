//! Human-readable error descriptions and structured JSON error formatting.

use saw_core::error::{BuildError, ControlError};
use saw_hardware::HwError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingBus => {
                "What happened: No field bus was provided to the control loop.\nLikely causes: The Modbus client or simulator was not wired into the builder.\nHow to fix: Pass a bus via with_bus(...) or run with --sim.".to_string()
            }
            BuildError::InvalidLayout(msg) => format!(
                "What happened: The register layout is invalid ({msg}).\nLikely causes: [layout] columns is missing a required channel or lists one twice.\nHow to fix: Edit [layout] columns in the config, then rerun."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/saw_config.toml for a sample."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<ControlError>() {
        return match ce {
            ControlError::Timeout => "What happened: The saw controller did not answer in time.\nLikely causes: Controller busy or unreachable, or fieldbus.timeout_ms too low.\nHow to fix: Check the network path to the controller and consider raising fieldbus.timeout_ms.".to_string(),
            ControlError::Transport(msg) => format!(
                "What happened: Could not talk to the saw controller ({msg}).\nLikely causes: Wrong fieldbus.host/port, controller powered off, or cable unplugged.\nHow to fix: Verify [fieldbus] in the config, or try --sim to check the rest of the setup."
            ),
            ControlError::Malformed { expected, got } => format!(
                "What happened: The controller returned {got} registers, expected {expected}.\nLikely causes: [layout] columns does not match the controller's register map.\nHow to fix: Align [layout] columns and fieldbus.register_count with the controller."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(hw) = err.downcast_ref::<HwError>() {
        return format!(
            "What happened: Field bus error ({hw}).\nLikely causes: Controller unreachable or rejecting the request.\nHow to fix: Verify [fieldbus] host, port and unit_id."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("speed table csv must have headers") {
        return "Invalid headers in speed table CSV. Expected 'height_mm,cutting_speed,descent_speed'."
            .to_string();
    }

    if lower.contains("speed table") {
        return format!(
            "What happened: The speed table is invalid ({msg}).\nLikely causes: Fewer than two rows, repeated heights, or heights out of order.\nHow to fix: Fix the CSV named by linear.table_csv."
        );
    }

    if lower.contains("read config") || lower.contains("parse config") {
        let cause = err.root_cause();
        return format!(
            "What happened: The config file could not be loaded ({cause}).\nLikely causes: Wrong --config path or a TOML syntax error.\nHow to fix: Check the path, then compare with etc/saw_config.toml."
        );
    }

    if lower.contains(" must ") {
        return format!(
            "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 3 setup/config, 4 bus unreachable, 5 malformed frame, 1 otherwise.
/// Usage errors exit with 2 from clap.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 3;
    }
    if let Some(ce) = err.downcast_ref::<ControlError>() {
        return match ce {
            ControlError::Transport(_) | ControlError::Timeout => 4,
            ControlError::Malformed { .. } => 5,
            ControlError::Config(_) => 3,
            _ => 1,
        };
    }
    if err.downcast_ref::<HwError>().is_some() {
        return 4;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingBus => "MissingBus",
            BuildError::InvalidLayout(_) => "InvalidLayout",
            BuildError::InvalidConfig(_) => "InvalidConfig",
        };
    }
    if let Some(ce) = err.downcast_ref::<ControlError>() {
        return match ce {
            ControlError::Transport(_) => "Transport",
            ControlError::Timeout => "Timeout",
            ControlError::Malformed { .. } => "Malformed",
            ControlError::Degenerate(_) => "Degenerate",
            ControlError::RatioDiverged { .. } => "RatioDiverged",
            ControlError::Config(_) => "Config",
        };
    }
    if err.downcast_ref::<HwError>().is_some() {
        return "Hardware";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
