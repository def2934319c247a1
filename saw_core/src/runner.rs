//! The outer loop: poll, compute, maybe write, sleep.
//!
//! `run` never returns early on a fault. Transport faults back off with the
//! retry policy, a broken link is reconnected with a fixed delay, and every
//! sleep is sliced so a raised stop flag ends the loop promptly.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::control::ControlLoop;
use crate::error::ControlError;
use crate::retry::RetryPolicy;
use crate::sink::SinkSet;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop after this many cycles; `None` runs until stopped.
    pub max_cycles: Option<u64>,
    pub retry: RetryPolicy,
    pub reconnect_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_cycles: None,
            retry: RetryPolicy::default(),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub cycles: u64,
    pub records: u64,
    pub writes: u64,
    pub transport_faults: u64,
    pub malformed: u64,
    pub reconnect_attempts: u64,
}

/// Drive `lp` until `stop` is raised or `max_cycles` is reached.
pub fn run(lp: &mut ControlLoop, sinks: &SinkSet, opts: &RunOptions, stop: &AtomicBool) -> RunStats {
    let mut stats = RunStats::default();
    let mut retry = opts.retry.clone();
    let poll = lp.control_cfg().poll_interval;

    while !stop.load(Ordering::Relaxed) {
        if opts.max_cycles.is_some_and(|m| stats.cycles >= m) {
            break;
        }
        stats.cycles += 1;

        if !lp.is_connected() {
            stats.reconnect_attempts += 1;
            match lp.reconnect() {
                Ok(()) => tracing::info!("field bus reconnected"),
                Err(e) => {
                    tracing::warn!(error = %e, delay_ms = duration_ms(opts.reconnect_delay), "reconnect failed");
                    if !lp.clock().sleep_unless(opts.reconnect_delay, stop) {
                        break;
                    }
                    continue;
                }
            }
        }

        match lp.step() {
            Ok(record) => {
                retry.reset();
                stats.records += 1;
                if record.outcome.wrote() {
                    stats.writes += 1;
                }
                sinks.dispatch(&record);
            }
            Err(e) if e.is_transport() => {
                stats.transport_faults += 1;
                let delay = retry.next_delay();
                tracing::warn!(
                    error = %e,
                    attempt = retry.attempt(),
                    backoff_ms = duration_ms(delay),
                    "transport fault; backing off"
                );
                if !lp.clock().sleep_unless(delay, stop) {
                    break;
                }
                continue;
            }
            Err(e @ ControlError::Malformed { .. }) => {
                stats.malformed += 1;
                tracing::warn!(error = %e, "cycle skipped");
            }
            Err(e) => {
                tracing::warn!(error = %e, "cycle failed");
            }
        }

        if !lp.clock().sleep_unless(poll, stop) {
            break;
        }
    }

    tracing::info!(
        cycles = stats.cycles,
        writes = stats.writes,
        transport_faults = stats.transport_faults,
        dropped = sinks.dropped(),
        "control loop stopped"
    );
    stats
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
