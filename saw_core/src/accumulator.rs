//! Fractional speed-correction buffer.
//!
//! Per-cycle corrections are usually a fraction of one speed unit. They are
//! summed here and released as whole units once either channel reaches a
//! magnitude of 1.

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeltaAccumulator {
    cutting: f64,
    descent: f64,
}

impl DeltaAccumulator {
    pub const EMIT_THRESHOLD: f64 = 1.0;

    pub const fn new() -> Self {
        Self {
            cutting: 0.0,
            descent: 0.0,
        }
    }

    #[inline]
    pub fn add(&mut self, cutting_inc: f64, descent_inc: f64) {
        self.cutting += cutting_inc;
        self.descent += descent_inc;
    }

    #[inline]
    pub fn should_emit(&self) -> bool {
        self.cutting.abs() >= Self::EMIT_THRESHOLD || self.descent.abs() >= Self::EMIT_THRESHOLD
    }

    /// Remove and return the floored whole part of each channel.
    ///
    /// Flooring rounds toward negative infinity, so a remainder is always in
    /// `[0, 1)` after a take.
    #[allow(clippy::cast_possible_truncation)]
    pub fn take_whole_adjustment(&mut self) -> (i64, i64) {
        let c = self.cutting.floor();
        let d = self.descent.floor();
        self.cutting -= c;
        self.descent -= d;
        (c as i64, d as i64)
    }

    /// Give back an adjustment that was taken but never written.
    #[allow(clippy::cast_precision_loss)]
    pub fn restore(&mut self, cutting: i64, descent: i64) {
        self.cutting += cutting as f64;
        self.descent += descent as f64;
    }

    pub const fn reset(&mut self) {
        self.cutting = 0.0;
        self.descent = 0.0;
    }

    /// `(cutting, descent)` still buffered.
    pub const fn remainder(&self) -> (f64, f64) {
        (self.cutting, self.descent)
    }

    pub fn is_zero(&self) -> bool {
        self.cutting == 0.0 && self.descent == 0.0
    }
}
