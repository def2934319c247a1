//! Speed setpoints to 16-bit register values.
//!
//! The descent register carries a sign in bit 15 with an inverted
//! convention: bit 15 set means non-negative. The cutting register is a
//! plain unsigned magnitude.
use crate::units::{CUTTING_SPEED_PER_COUNT, DESCENT_SPEED_ORIGIN, DESCENT_SPEED_PER_COUNT};

pub const CUTTING_SPEED_REGISTER: u16 = 2066;
pub const DESCENT_SPEED_REGISTER: u16 = 2041;

const SIGN_BIT: u16 = 0x8000;
const MAGNITUDE_MASK: u16 = 0x7FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedChannel {
    Cutting,
    Descent,
}

/// Register counts for a speed in engineering units, rounded up.
pub fn encode_speed(value: f64, channel: SpeedChannel) -> i64 {
    let counts = match channel {
        SpeedChannel::Cutting => value / CUTTING_SPEED_PER_COUNT,
        SpeedChannel::Descent => value / DESCENT_SPEED_PER_COUNT + DESCENT_SPEED_ORIGIN,
    };
    // Saturating float-to-int cast; NaN maps to 0.
    counts.ceil() as i64
}

/// Pack a 15-bit magnitude with the descent-register sign convention.
#[inline]
pub const fn pack_signed(magnitude: u16, is_negative: bool) -> u16 {
    let sign = if is_negative { 0 } else { SIGN_BIT };
    sign | (magnitude & MAGNITUDE_MASK)
}

/// Inverse of `pack_signed`: `(magnitude, is_negative)`.
#[inline]
pub const fn unpack_signed(value: u16) -> (u16, bool) {
    (value & MAGNITUDE_MASK, value & SIGN_BIT == 0)
}

/// Register value for the cutting-speed setpoint.
pub fn cutting_register_value(speed: f64) -> u16 {
    let counts = encode_speed(speed, SpeedChannel::Cutting).clamp(0, i64::from(u16::MAX));
    u16::try_from(counts).unwrap_or(u16::MAX)
}

/// Register value for the descent-speed setpoint, sign-bit packed.
pub fn descent_register_value(speed: f64) -> u16 {
    let counts = encode_speed(speed, SpeedChannel::Descent);
    let low = u16::try_from(counts & i64::from(MAGNITUDE_MASK)).unwrap_or(0);
    pack_signed(low, speed < 0.0)
}
