//! Bus assembly and the `run` / `self-check` command bodies.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use eyre::{Result, WrapErr};
use saw_config::{Config, ControlMode};
use saw_core::bus_error::map_bus_error;
use saw_core::{
    ColumnLayout, ControlLoopBuilder, NormalizedReading, RunOptions, RunStats, SinkSet, normalize,
    run,
};
use saw_hardware::{ModbusTcp, SimProfile, SimulatedSaw};
use saw_traits::{Clock, FieldBus, MonotonicClock};

/// The simulated saw or an (initially unconnected) Modbus client.
pub fn open_bus(cfg: &Config, sim: bool) -> Box<dyn FieldBus + Send> {
    if sim {
        let profile = SimProfile {
            cutting_register: cfg.fieldbus.cutting_register,
            descent_register: cfg.fieldbus.descent_register,
            ..SimProfile::default()
        };
        tracing::info!("using simulated saw");
        Box::new(SimulatedSaw::new(cfg.layout.columns.clone(), profile))
    } else {
        let bus = ModbusTcp::new(
            cfg.fieldbus.host.clone(),
            cfg.fieldbus.port,
            cfg.fieldbus.unit_id,
            Duration::from_millis(cfg.fieldbus.timeout_ms),
        );
        tracing::info!(endpoint = %bus.endpoint(), unit_id = cfg.fieldbus.unit_id, "using modbus endpoint");
        Box::new(bus)
    }
}

pub fn run_control(
    cfg: &Config,
    base_dir: Option<&Path>,
    sim: bool,
    mode: Option<ControlMode>,
    max_cycles: Option<u64>,
    shutdown: &AtomicBool,
) -> Result<(RunStats, u64)> {
    let mut builder = ControlLoopBuilder::from_config(cfg, base_dir)?.with_boxed_bus(open_bus(cfg, sim));
    if let Some(m) = mode {
        builder = builder.initial_mode(m);
    }
    let mut lp = builder.build()?;
    let sinks = SinkSet::from_config(&cfg.sinks, base_dir)?;
    let opts = RunOptions {
        max_cycles,
        ..RunOptions::from(cfg)
    };

    tracing::info!(
        mode = lp.active_mode().as_str(),
        registers = lp.layout().len(),
        poll_ms = cfg.control.poll_interval_ms,
        "control loop start"
    );
    let stats = run(&mut lp, &sinks, &opts, shutdown);
    let dropped = sinks.dropped();
    Ok((stats, dropped))
}

/// One read, one normalize.
pub fn self_check(cfg: &Config, sim: bool) -> Result<NormalizedReading> {
    let layout = ColumnLayout::new(cfg.layout.columns.clone()).map_err(eyre::Report::new)?;
    let mut bus = open_bus(cfg, sim);
    if !bus.is_connected() {
        bus.reconnect()
            .map_err(|e| eyre::Report::new(map_bus_error(&*e)))
            .wrap_err("connect to saw controller")?;
    }
    let count = u16::try_from(layout.len()).wrap_err("layout too long for one read")?;
    let frame = bus
        .read_holding_registers(cfg.fieldbus.start_address, count)
        .map_err(|e| eyre::Report::new(map_bus_error(&*e)))?;
    tracing::trace!(?frame, "self-check frame");
    let reading = normalize(&layout, &frame, MonotonicClock::new().unix_ms())?;
    Ok(reading)
}

/// Print run statistics to stderr.
pub fn print_stats(stats: &RunStats, dropped: u64) {
    eprintln!("\n--- Saw Stats ---");
    eprintln!("Cycles: {}", stats.cycles);
    eprintln!("Records: {}", stats.records);
    eprintln!("Speed writes: {}", stats.writes);
    eprintln!("Transport faults: {}", stats.transport_faults);
    eprintln!("Malformed frames: {}", stats.malformed);
    eprintln!("Reconnect attempts: {}", stats.reconnect_attempts);
    eprintln!("Sink records dropped: {dropped}");
    eprintln!("-----------------\n");
}
