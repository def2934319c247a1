use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Fast loop settings so simulated runs finish in well under a second.
fn write_valid_config(dir: &tempfile::TempDir, extra: &str) -> PathBuf {
    let toml = format!(
        r#"
[fieldbus]
host = "127.0.0.1"
port = 502

[control]
mode = "fuzzy"
poll_interval_ms = 5
speed_adjustment_interval_ms = 20
settle_ms = 0

[retry]
initial_backoff_ms = 5
max_backoff_ms = 20
reconnect_delay_ms = 5
{extra}
"#
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn saw() -> Command {
    Command::cargo_bin("saw").unwrap()
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["health"], 0, "mode: fuzzy", "stdout")]
#[case(&["infer", "--current", "22", "--delta", "0"], 0, "correction factor:", "stdout")]
#[case(&["run", "--sim", "--max-cycles", "30"], 0, "run complete: 30 cycles", "stdout")]
#[case(&["self-check", "--sim"], 0, "OK: state=Idle", "stdout")]
#[case(&["infer", "--current", "22"], 2, "required", "stderr")]
#[case(&["run", "--mode", "turbo"], 2, "invalid value", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");

    let mut cmd = saw();
    cmd.arg("--config").arg(&cfg).arg("--log-level").arg("warn");
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn infer_json_reports_strong_slowdown() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");
    let out = saw()
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .args(["infer", "--current", "30", "--delta", "5"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let f = v["correction_factor"].as_f64().unwrap();
    assert!(f < -2.5, "{f}");
}

#[rstest]
fn sim_run_writes_sink_files() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(
        &dir,
        r#"
[sinks]
persist_csv = "cycles.csv"
telemetry_jsonl = "telemetry.jsonl"
"#,
    );
    let out = saw()
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .args(["run", "--sim", "--max-cycles", "40"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let summary: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(summary["cycles"], 40);
    assert_eq!(summary["records"], 40);

    // Relative sink paths resolve next to the config file.
    let csv = fs::read_to_string(dir.path().join("cycles.csv")).unwrap();
    assert_eq!(csv.lines().count(), 41);
    let jsonl = fs::read_to_string(dir.path().join("telemetry.jsonl")).unwrap();
    assert_eq!(jsonl.lines().count(), 40);
}

#[rstest]
fn missing_config_is_explained() {
    let dir = tempdir().unwrap();
    saw()
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("health")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("config file could not be loaded"));
}

#[rstest]
fn invalid_config_is_rejected_before_running() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "[ratio]\nstep = 0.0\n");
    saw()
        .arg("--config")
        .arg(&cfg)
        .args(["run", "--sim", "--max-cycles", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ratio.step must be > 0"));
}

#[rstest]
fn bad_speed_table_header_is_reported() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("table.csv"), "h,c,d\n100,60,30\n200,70,40\n").unwrap();
    let cfg = write_valid_config(&dir, "[linear]\ntable_csv = \"table.csv\"\n");
    saw()
        .arg("--config")
        .arg(&cfg)
        .args(["run", "--sim", "--max-cycles", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers in speed table CSV"));
}

#[rstest]
fn json_errors_are_structured() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "[layout]\ncolumns = [\"cutting_state\"]\n");
    let out = saw()
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .args(["self-check", "--sim"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(v["message"].as_str().unwrap().contains("missing required channel"));
}
