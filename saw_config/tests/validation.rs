use rstest::rstest;
use saw_config::{Channel, ControlMode, load_toml};

#[test]
fn full_config_parses_and_validates() {
    let toml = r#"
[fieldbus]
host = "192.168.1.147"
port = 502
start_address = 0
register_count = 19
timeout_ms = 300

[control]
mode = "linear"
poll_interval_ms = 100
speed_adjustment_interval_ms = 200
settle_ms = 5000

[ratio]
initial_percent = 70.5

[linear]
multiplier = 1.2
min_speed = 5
max_speed = 101

[sinks]
persist_csv = "out/rows.csv"
queue_capacity = 64

[logging]
rotation = "daily"
"#;

    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.control.mode, ControlMode::Linear);
    assert_eq!(cfg.fieldbus.host, "192.168.1.147");
    assert_eq!(cfg.fieldbus.descent_register, 2041);
    assert_eq!(cfg.layout.columns[0], Channel::CuttingState);
}

#[rstest]
#[case("[fieldbus]\nport = 0\n", "fieldbus.port must be > 0")]
#[case("[fieldbus]\nregister_count = 7\n", "register_count (7) must equal")]
#[case(
    "[fieldbus]\ncutting_register = 2041\n",
    "cutting_register and fieldbus.descent_register must differ"
)]
#[case(
    "[layout]\ncolumns = [\"cutting_state\", \"cutting_speed\"]\n",
    "missing required channel head_height_mm"
)]
#[case(
    "[layout]\ncolumns = [\"cutting_state\", \"cutting_state\"]\n",
    "cutting_state more than once"
)]
#[case("[control]\npoll_interval_ms = 0\n", "poll_interval_ms must be >= 1")]
#[case("[control]\ndescent_gain = 0.0\n", "descent_gain must be > 0")]
#[case("[ratio]\nstep = -0.1\n", "ratio.step must be > 0")]
#[case("[ratio]\nmax_iterations = 0\n", "max_iterations must be >= 1")]
#[case("[fuzzy]\nresolution = 2.0\n", "fuzzy.resolution must be in")]
#[case("[linear]\nmin_speed = 50\nmax_speed = 40\n", "max_speed must be > linear.min_speed")]
#[case("[retry]\njitter = 1.5\n", "retry.jitter must be in")]
#[case(
    "[retry]\ninitial_backoff_ms = 500\nmax_backoff_ms = 100\n",
    "max_backoff_ms must be >="
)]
#[case("[sinks]\nqueue_capacity = 0\n", "queue_capacity must be >= 1")]
#[case("[logging]\nrotation = \"weekly\"\n", "never|daily|hourly")]
fn rejects_invalid_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    let msg = format!("{err}");
    assert!(msg.contains(needle), "expected '{needle}' in '{msg}'");
}

#[test]
fn rejects_unknown_mode_at_parse_time() {
    assert!(load_toml("[control]\nmode = \"turbo\"\n").is_err());
}
