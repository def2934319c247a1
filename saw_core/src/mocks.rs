//! Test doubles for driving the control loop without a machine.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use saw_traits::{BoxError, Clock, FieldBus};

/// What the next read returns.
#[derive(Debug, Clone)]
pub enum Scripted {
    Frame(Vec<u16>),
    Fail(String),
}

#[derive(Debug, Default)]
struct BusLog {
    script: VecDeque<Scripted>,
    writes: Vec<(u16, u16)>,
    reads: usize,
    connected: bool,
    reconnects: usize,
    fail_writes: usize,
    /// Register address and how many more writes to it fail.
    fail_address: Option<(u16, usize)>,
}

/// A bus that replays queued frames and records every write.
///
/// Once the script runs out, the last frame repeats. A scripted failure
/// drops the link until `reconnect` is called.
#[derive(Debug, Clone)]
pub struct ScriptedBus {
    log: Arc<Mutex<BusLog>>,
    last: Arc<Mutex<Option<Vec<u16>>>>,
}

impl Default for ScriptedBus {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedBus {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(BusLog {
                connected: true,
                ..BusLog::default()
            })),
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub fn push_frame(&self, frame: Vec<u16>) -> &Self {
        lock(&self.log).script.push_back(Scripted::Frame(frame));
        self
    }

    pub fn push_failure(&self, msg: &str) -> &Self {
        lock(&self.log).script.push_back(Scripted::Fail(msg.to_string()));
        self
    }

    /// Fail the next `n` register writes.
    pub fn fail_writes(&self, n: usize) {
        lock(&self.log).fail_writes = n;
    }

    /// Fail the next `n` writes to `address` only.
    pub fn fail_writes_to(&self, address: u16, n: usize) {
        lock(&self.log).fail_address = Some((address, n));
    }

    pub fn writes(&self) -> Vec<(u16, u16)> {
        lock(&self.log).writes.clone()
    }

    pub fn reads(&self) -> usize {
        lock(&self.log).reads
    }

    pub fn reconnects(&self) -> usize {
        lock(&self.log).reconnects
    }
}

impl FieldBus for ScriptedBus {
    fn read_holding_registers(&mut self, _start: u16, _count: u16) -> Result<Vec<u16>, BoxError> {
        let mut log = lock(&self.log);
        if !log.connected {
            return Err(Box::new(std::io::Error::other("not connected")));
        }
        log.reads += 1;
        match log.script.pop_front() {
            Some(Scripted::Frame(f)) => {
                *lock(&self.last) = Some(f.clone());
                Ok(f)
            }
            Some(Scripted::Fail(msg)) => {
                log.connected = false;
                Err(Box::new(std::io::Error::other(msg)))
            }
            None => lock(&self.last)
                .clone()
                .ok_or_else(|| Box::new(std::io::Error::other("script exhausted")) as BoxError),
        }
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), BoxError> {
        let mut log = lock(&self.log);
        if log.fail_writes > 0 {
            log.fail_writes -= 1;
            return Err(Box::new(std::io::Error::other("write rejected")));
        }
        if let Some((addr, left)) = log.fail_address.as_mut() {
            if *addr == address && *left > 0 {
                *left -= 1;
                return Err(Box::new(std::io::Error::other("write rejected")));
            }
        }
        log.writes.push((address, value));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.log).connected
    }

    fn reconnect(&mut self) -> Result<(), BoxError> {
        let mut log = lock(&self.log);
        log.reconnects += 1;
        log.connected = true;
        Ok(())
    }
}

/// A clock that only moves when told to. `sleep` advances it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, d: Duration) {
        let mut off = lock(&self.offset);
        *off += d;
    }

    pub fn elapsed(&self) -> Duration {
        *lock(&self.offset)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }

    fn unix_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
