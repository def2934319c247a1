use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use saw_core::mocks::{ManualClock, ScriptedBus};
use saw_core::{
    Channel, ColumnLayout, ControlCfg, ControlLoop, ControlMode, CsvRowStore, CycleRecord,
    JsonLinesPublisher, RecentHistory, RecordSink, RunOptions, SinkSet, SinkWorker, run,
};
use saw_hardware::SimulatedSaw;

fn idle_frame() -> Vec<u16> {
    let layout = ColumnLayout::standard();
    let mut f = vec![0u16; layout.len()];
    f[layout.position(Channel::MotorCurrentA).unwrap()] = 20;
    f[layout.position(Channel::CuttingSpeed).unwrap()] = 900;
    f
}

fn opts(max_cycles: u64) -> RunOptions {
    RunOptions {
        max_cycles: Some(max_cycles),
        ..RunOptions::default()
    }
}

#[test]
fn closed_loop_against_simulator_adjusts_speeds() {
    let saw = SimulatedSaw::with_default_layout();
    let handle = saw.handle();
    let mut lp = ControlLoop::builder()
        .with_bus(saw)
        .with_clock(ManualClock::new())
        .initial_mode(ControlMode::Fuzzy)
        .build()
        .unwrap();
    let sinks = SinkSet::new().with_history(RecentHistory::new(50));
    let stop = AtomicBool::new(false);

    let stats = run(&mut lp, &sinks, &opts(200), &stop);

    assert_eq!(stats.cycles, 200);
    assert_eq!(stats.records, 200);
    assert_eq!(stats.transport_faults, 0);
    assert!(stats.writes > 0, "{stats:?}");
    assert!(handle.is_cutting());
    let (_, descent) = handle.speeds();
    assert!(descent < 50.0, "overloaded saw should feed slower, got {descent}");
    let history = sinks.history().unwrap();
    assert_eq!(history.len(), 50);
    assert_eq!(history.snapshot().last().unwrap().mode, "fuzzy");
}

#[test]
fn transport_fault_reconnects_and_continues() {
    let bus = ScriptedBus::new();
    bus.push_frame(idle_frame())
        .push_failure("connection reset by peer")
        .push_frame(idle_frame());
    let mut lp = ControlLoop::builder()
        .with_bus(bus.clone())
        .with_clock(ManualClock::new())
        .build()
        .unwrap();
    let stop = AtomicBool::new(false);

    let stats = run(&mut lp, &SinkSet::new(), &opts(4), &stop);

    assert_eq!(stats.cycles, 4);
    assert_eq!(stats.records, 3);
    assert_eq!(stats.transport_faults, 1);
    assert_eq!(stats.reconnect_attempts, 1);
    assert_eq!(bus.reconnects(), 1);
    assert!(lp.is_connected());
}

#[test]
fn refused_reconnects_are_retried() {
    let saw = SimulatedSaw::with_default_layout();
    let handle = saw.handle();
    handle.fail_next_reads(1);
    handle.refuse_reconnects(2);
    let mut lp = ControlLoop::builder()
        .with_bus(saw)
        .with_clock(ManualClock::new())
        .build()
        .unwrap();
    let stop = AtomicBool::new(false);

    let stats = run(&mut lp, &SinkSet::new(), &opts(6), &stop);

    assert_eq!(stats.transport_faults, 1);
    assert_eq!(stats.reconnect_attempts, 3);
    assert_eq!(stats.records, 3);
    assert!(lp.is_connected());
}

#[test]
fn raised_stop_flag_ends_a_long_sleep_promptly() {
    let bus = ScriptedBus::new();
    bus.push_frame(idle_frame());
    let mut lp = ControlLoop::builder()
        .with_bus(bus)
        .control(ControlCfg {
            poll_interval: Duration::from_secs(30),
            ..ControlCfg::default()
        })
        .build()
        .unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let setter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        flag.store(true, Ordering::Relaxed);
    });

    let started = Instant::now();
    let stats = run(&mut lp, &SinkSet::new(), &RunOptions::default(), &stop);
    setter.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(stats.cycles, 1);
}

#[test]
fn stop_before_start_runs_nothing() {
    let bus = ScriptedBus::new();
    let mut lp = ControlLoop::builder().with_bus(bus.clone()).build().unwrap();
    let stop = AtomicBool::new(true);
    let stats = run(&mut lp, &SinkSet::new(), &RunOptions::default(), &stop);
    assert_eq!(stats.cycles, 0);
    assert_eq!(bus.reads(), 0);
}

struct GatedSink {
    gate: xch::Receiver<()>,
}

impl RecordSink for GatedSink {
    fn accept(&mut self, _record: &CycleRecord) -> saw_core::Result<()> {
        // Blocks until the test drops the sender.
        let _ = self.gate.recv();
        Ok(())
    }
}

#[test]
fn stalled_sink_drops_records_instead_of_blocking() {
    let (gate_tx, gate_rx) = xch::bounded::<()>(0);
    let worker = SinkWorker::spawn("stalled", GatedSink { gate: gate_rx }, 2);
    let sinks = SinkSet::new().with_worker(worker);

    let bus = ScriptedBus::new();
    bus.push_frame(idle_frame());
    let mut lp = ControlLoop::builder()
        .with_bus(bus)
        .with_clock(ManualClock::new())
        .build()
        .unwrap();
    let stop = AtomicBool::new(false);

    let started = Instant::now();
    let stats = run(&mut lp, &sinks, &opts(50), &stop);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(stats.records, 50);
    assert!(sinks.dropped() >= 40, "dropped {}", sinks.dropped());

    drop(gate_tx);
    let accepted_before_drop = sinks.workers()[0].accepted();
    assert!(accepted_before_drop <= 3);
    drop(sinks);
}

#[test]
fn file_sinks_capture_every_record() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("cycles.csv");
    let json_path = dir.path().join("telemetry.jsonl");

    let sinks = SinkSet::new()
        .with_worker(SinkWorker::spawn("persist", CsvRowStore::open(&csv_path).unwrap(), 64))
        .with_worker(SinkWorker::spawn(
            "telemetry",
            JsonLinesPublisher::create(&json_path).unwrap(),
            64,
        ));
    let mut lp = ControlLoop::builder()
        .with_bus(SimulatedSaw::with_default_layout())
        .with_clock(ManualClock::new())
        .build()
        .unwrap();
    let stop = AtomicBool::new(false);
    let stats = run(&mut lp, &sinks, &opts(20), &stop);
    assert_eq!(stats.records, 20);
    // Joining the workers drains and flushes both files.
    drop(sinks);

    let csv_text = std::fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = csv_text.lines().collect();
    assert_eq!(lines.len(), 21);
    assert!(lines[0].starts_with("timestamp_ms,"));
    assert_eq!(
        lines[1].split(',').count(),
        CycleRecord::csv_header().len()
    );

    let json_text = std::fs::read_to_string(&json_path).unwrap();
    assert_eq!(json_text.lines().count(), 20);
    for line in json_text.lines() {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(v["ts"].is_u64());
        assert!(v["values"]["motor_current_a"].is_number());
    }
}

#[test]
fn persistence_csv_appends_without_repeating_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cycles.csv");
    let bus = ScriptedBus::new();
    bus.push_frame(idle_frame());
    let mut lp = ControlLoop::builder()
        .with_bus(bus)
        .with_clock(ManualClock::new())
        .build()
        .unwrap();

    for _ in 0..2 {
        let mut store = CsvRowStore::open(&path).unwrap();
        let rec = lp.step().unwrap();
        store.accept(&rec).unwrap();
    }
    let text = std::fs::read_to_string(&path).unwrap();
    let headers = text.lines().filter(|l| l.starts_with("timestamp_ms,")).count();
    assert_eq!(headers, 1);
    assert_eq!(text.lines().count(), 3);
}
