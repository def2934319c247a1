//! Backoff policy for transport faults.
use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a cap and symmetric jitter.
///
/// Each `next_delay` doubles the base delay up to `max`; `reset` after a
/// successful cycle starts over from `initial`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial: Duration,
    max: Duration,
    /// Fraction of the delay randomly added or removed, in `[0, 1]`.
    jitter: f64,
    attempt: u32,
}

impl RetryPolicy {
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 },
            attempt: 0,
        }
    }

    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for the current attempt.
    pub fn base_delay(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(1.0 + spread)
    }

    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5), 0.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let mut p = RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(700), 0.0);
        let got: Vec<u128> = (0..5).map(|_| p.next_delay().as_millis()).collect();
        assert_eq!(got, vec![100, 200, 400, 700, 700]);
        p.reset();
        assert_eq!(p.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut p = RetryPolicy::new(Duration::from_millis(1000), Duration::from_millis(1000), 0.2);
        for _ in 0..200 {
            let d = p.next_delay().as_millis();
            assert!((799..=1201).contains(&d), "{d}");
        }
    }

    #[test]
    fn many_attempts_do_not_overflow() {
        let mut p = RetryPolicy::new(Duration::from_millis(10), Duration::from_secs(3), 0.0);
        for _ in 0..100 {
            p.next_delay();
        }
        assert_eq!(p.next_delay(), Duration::from_secs(3));
    }

    #[test]
    fn out_of_range_jitter_is_clamped() {
        let mut p = RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(100), f64::NAN);
        assert_eq!(p.next_delay(), Duration::from_millis(100));
    }
}
