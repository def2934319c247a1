#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod control;
mod error_fmt;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Result, WrapErr};
use saw_config::Config;
use saw_core::FuzzyEngine;
use serde_json::json;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("warning: failed to install error report handler: {e}");
    }

    if let Err(err) = real_main(cli) {
        tracing::error!(error = %err, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    init_tracing(&cli, &cfg)?;
    let base_dir = cli.config.parent().filter(|p| !p.as_os_str().is_empty());

    match cli.cmd {
        Commands::Run {
            sim,
            mode,
            max_cycles,
            stats,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            ctrlc::set_handler(move || {
                flag.store(true, Ordering::Relaxed);
            })
            .wrap_err("install Ctrl-C handler")?;

            let (run_stats, dropped) = control::run_control(
                &cfg,
                base_dir,
                sim,
                mode.map(Into::into),
                max_cycles,
                &shutdown,
            )?;
            if stats {
                control::print_stats(&run_stats, dropped);
            }
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "cycles": run_stats.cycles,
                        "records": run_stats.records,
                        "writes": run_stats.writes,
                        "transport_faults": run_stats.transport_faults,
                        "malformed": run_stats.malformed,
                        "reconnect_attempts": run_stats.reconnect_attempts,
                        "sink_dropped": dropped,
                        "interrupted": shutdown.load(Ordering::Relaxed),
                    })
                );
            } else {
                println!(
                    "run complete: {} cycles, {} speed writes, {} transport faults",
                    run_stats.cycles, run_stats.writes, run_stats.transport_faults
                );
            }
        }
        Commands::SelfCheck { sim } => {
            let reading = control::self_check(&cfg, sim)?;
            if cli.json {
                println!("{}", serde_json::to_string(&reading)?);
            } else {
                println!(
                    "OK: state={:?} current={:.1} A height={:.1} mm cutting={:.2} descent={:.2} alarm={}",
                    reading.state(),
                    reading.motor_current_a,
                    reading.head_height_mm,
                    reading.cutting_speed,
                    reading.descent_speed,
                    reading.alarm_code
                );
            }
        }
        Commands::Infer { current, delta } => {
            let engine = FuzzyEngine::from(&cfg.fuzzy);
            let factor = engine.infer(current, delta);
            if cli.json {
                println!(
                    "{}",
                    json!({ "current": current, "delta": delta, "correction_factor": factor })
                );
            } else {
                println!("correction factor: {factor:.4}");
            }
        }
        Commands::Health => {
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "status": "ok",
                        "endpoint": format!("{}:{}", cfg.fieldbus.host, cfg.fieldbus.port),
                        "mode": cfg.control.mode.as_str(),
                        "registers": cfg.register_count(),
                        "poll_interval_ms": cfg.control.poll_interval_ms,
                        "speed_table": cfg.linear.table_csv,
                    })
                );
            } else {
                println!("OK");
                println!("endpoint: {}:{}", cfg.fieldbus.host, cfg.fieldbus.port);
                println!("mode: {}", cfg.control.mode.as_str());
                println!("registers: {}", cfg.register_count());
                println!("poll interval: {} ms", cfg.control.poll_interval_ms);
            }
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = saw_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

fn init_tracing(cli: &Cli, cfg: &Config) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let console = if cli.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter)
            .boxed()
    };

    let file = match cfg.logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file must name a file"))?;
            let appender = match cfg.logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let level = cfg.logging.level.as_deref().unwrap_or("info");
            Some(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(EnvFilter::new(level))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(())
}
