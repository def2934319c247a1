use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Longest single sleep taken by `sleep_unless`, so a raised stop flag is
/// noticed promptly.
pub const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Time source for the control loop.
///
/// - now(): monotonic instant used for pacing, settling and ratio checks
/// - unix_ms(): wall-clock timestamp stamped on every reading
/// - sleep(): sleeps for the provided duration (implementations may simulate)
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Milliseconds since the UNIX epoch, 0 if the system clock is before it.
    fn unix_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
    }

    /// Sleep for `d` in slices of at most `SLEEP_SLICE`, returning early once
    /// `stop` is raised. Returns true if the full duration elapsed.
    fn sleep_unless(&self, d: Duration, stop: &AtomicBool) -> bool {
        let mut remaining = d;
        while !remaining.is_zero() {
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            let slice = remaining.min(SLEEP_SLICE);
            self.sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
        !stop.load(Ordering::Relaxed)
    }
}

/// Real-time clock backed by `std::time::Instant` and `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, d: Duration) {
        (**self).sleep(d);
    }

    fn unix_ms(&self) -> u64 {
        (**self).unix_ms()
    }
}
