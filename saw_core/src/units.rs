//! Raw register frame to engineering units.
//!
//! Pure and stateless: the same frame always yields the same reading.
//! Scaling is fixed per channel; two wrapped channels get an unwrap
//! correction after scaling.
use serde::Serialize;

pub use saw_config::Channel;

use crate::error::{BuildError, ControlError};

/// Status code the saw controller reports while a cut is in progress.
pub const CUTTING_STATE_CUTTING: u16 = 3;
/// Engineering units of cutting speed per register count.
pub const CUTTING_SPEED_PER_COUNT: f64 = 0.0754;
/// Engineering units of descent speed per register count below `DESCENT_SPEED_ORIGIN`.
pub const DESCENT_SPEED_PER_COUNT: f64 = -0.06;
/// Register value that encodes zero descent speed.
pub const DESCENT_SPEED_ORIGIN: f64 = 65535.0;

const DESCENT_CURRENT_WRAP_A: f64 = 15.0;
const BAND_DEVIATION_WRAP: f64 = 1.5;
const WRAP_SPAN: f64 = 655.35;

const CHANNEL_COUNT: usize = Channel::DEFAULT_ORDER.len();

/// Discrete machine state derived from the status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CuttingState {
    Idle,
    Cutting,
}

impl CuttingState {
    pub const fn from_code(code: u16) -> Self {
        if code == CUTTING_STATE_CUTTING {
            Self::Cutting
        } else {
            Self::Idle
        }
    }
}

/// One machine-cycle snapshot in engineering units.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedReading {
    pub cutting_state: u16,
    pub alarm_status: u16,
    pub alarm_code: String,
    pub head_height_mm: f64,
    pub motor_current_a: f64,
    pub motor_torque_percent: f64,
    pub descent_current_a: f64,
    pub clamp_pressure_bar: f64,
    pub band_tension_bar: f64,
    pub band_deviation: f64,
    pub ambient_temp_c: f64,
    pub ambient_humidity_percent: f64,
    pub coolant_temp_c: f64,
    pub hydraulic_oil_temp_c: f64,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub descent_speed: f64,
    pub cutting_speed: f64,
    /// Milliseconds since the UNIX epoch.
    pub timestamp_ms: u64,
}

impl NormalizedReading {
    pub const fn state(&self) -> CuttingState {
        CuttingState::from_code(self.cutting_state)
    }
}

/// Ordered channel list describing the raw frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    columns: Vec<Channel>,
    slots: [Option<usize>; CHANNEL_COUNT],
}

impl ColumnLayout {
    pub fn new(columns: Vec<Channel>) -> Result<Self, BuildError> {
        if columns.is_empty() {
            return Err(BuildError::InvalidLayout("no channels".into()));
        }
        let mut slots = [None; CHANNEL_COUNT];
        for (i, c) in columns.iter().enumerate() {
            let slot = &mut slots[*c as usize];
            if slot.is_some() {
                return Err(BuildError::InvalidLayout(format!(
                    "{} listed more than once",
                    c.name()
                )));
            }
            *slot = Some(i);
        }
        for req in Channel::REQUIRED {
            if slots[req as usize].is_none() {
                return Err(BuildError::InvalidLayout(format!(
                    "missing required channel {}",
                    req.name()
                )));
            }
        }
        Ok(Self { columns, slots })
    }

    /// The controller's factory register order.
    pub fn standard() -> Self {
        let mut slots = [None; CHANNEL_COUNT];
        for (i, c) in Channel::DEFAULT_ORDER.iter().enumerate() {
            slots[*c as usize] = Some(i);
        }
        Self {
            columns: Channel::DEFAULT_ORDER.to_vec(),
            slots,
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Channel] {
        &self.columns
    }

    pub fn position(&self, channel: Channel) -> Option<usize> {
        self.slots[channel as usize]
    }

    fn raw(&self, frame: &[u16], channel: Channel) -> u16 {
        self.position(channel)
            .and_then(|i| frame.get(i).copied())
            .unwrap_or(0)
    }
}

/// Divisor for plain analog channels; `None` for channels with their own rule.
pub const fn divisor(channel: Channel) -> Option<f64> {
    match channel {
        Channel::HeadHeightMm
        | Channel::MotorCurrentA
        | Channel::MotorTorquePercent
        | Channel::ClampPressureBar
        | Channel::BandTensionBar
        | Channel::AmbientTempC
        | Channel::AmbientHumidityPercent
        | Channel::CoolantTempC
        | Channel::HydraulicOilTempC => Some(10.0),
        Channel::DescentCurrentA | Channel::BandDeviation => Some(100.0),
        Channel::AccelX | Channel::AccelY | Channel::AccelZ => Some(1.0),
        Channel::CuttingState
        | Channel::AlarmStatus
        | Channel::AlarmCode
        | Channel::DescentSpeed
        | Channel::CuttingSpeed => None,
    }
}

#[inline]
pub fn cutting_speed_from_raw(raw: u16) -> f64 {
    f64::from(raw) * CUTTING_SPEED_PER_COUNT
}

/// A zero register means the feed is stopped, not the far end of the scale.
#[inline]
pub fn descent_speed_from_raw(raw: u16) -> f64 {
    if raw == 0 {
        0.0
    } else {
        (f64::from(raw) - DESCENT_SPEED_ORIGIN) * DESCENT_SPEED_PER_COUNT
    }
}

#[inline]
pub fn unwrap_descent_current(a: f64) -> f64 {
    if a > DESCENT_CURRENT_WRAP_A {
        WRAP_SPAN - a
    } else {
        a
    }
}

#[inline]
pub fn unwrap_band_deviation(d: f64) -> f64 {
    if d.abs() > BAND_DEVIATION_WRAP {
        d.abs() - WRAP_SPAN
    } else {
        d
    }
}

/// Convert one raw frame laid out per `layout`. Channels absent from the
/// layout read as 0.
pub fn normalize(
    layout: &ColumnLayout,
    frame: &[u16],
    timestamp_ms: u64,
) -> Result<NormalizedReading, ControlError> {
    if frame.len() != layout.len() {
        return Err(ControlError::Malformed {
            expected: layout.len(),
            got: frame.len(),
        });
    }
    let raw = |c: Channel| layout.raw(frame, c);
    let scaled = |c: Channel| f64::from(raw(c)) / divisor(c).unwrap_or(1.0);

    Ok(NormalizedReading {
        cutting_state: raw(Channel::CuttingState),
        alarm_status: raw(Channel::AlarmStatus),
        alarm_code: format!("0x{:04x}", raw(Channel::AlarmCode)),
        head_height_mm: scaled(Channel::HeadHeightMm),
        motor_current_a: scaled(Channel::MotorCurrentA),
        motor_torque_percent: scaled(Channel::MotorTorquePercent),
        descent_current_a: unwrap_descent_current(scaled(Channel::DescentCurrentA)),
        clamp_pressure_bar: scaled(Channel::ClampPressureBar),
        band_tension_bar: scaled(Channel::BandTensionBar),
        band_deviation: unwrap_band_deviation(scaled(Channel::BandDeviation)),
        ambient_temp_c: scaled(Channel::AmbientTempC),
        ambient_humidity_percent: scaled(Channel::AmbientHumidityPercent),
        coolant_temp_c: scaled(Channel::CoolantTempC),
        hydraulic_oil_temp_c: scaled(Channel::HydraulicOilTempC),
        accel_x: scaled(Channel::AccelX),
        accel_y: scaled(Channel::AccelY),
        accel_z: scaled(Channel::AccelZ),
        descent_speed: descent_speed_from_raw(raw(Channel::DescentSpeed)),
        cutting_speed: cutting_speed_from_raw(raw(Channel::CuttingSpeed)),
        timestamp_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn frame_with(pairs: &[(Channel, u16)]) -> Vec<u16> {
        let layout = ColumnLayout::standard();
        let mut f = vec![0u16; layout.len()];
        for (c, v) in pairs {
            f[layout.position(*c).unwrap()] = *v;
        }
        f
    }

    #[test]
    fn scales_standard_frame() {
        let f = frame_with(&[
            (Channel::CuttingState, 3),
            (Channel::AlarmCode, 0x1a2),
            (Channel::HeadHeightMm, 2505),
            (Channel::MotorCurrentA, 221),
            (Channel::MotorTorquePercent, 75),
            (Channel::DescentCurrentA, 350),
            (Channel::BandDeviation, 12),
            (Channel::AmbientHumidityPercent, 412),
            (Channel::AccelY, 7),
            (Channel::CuttingSpeed, 1000),
            (Channel::DescentSpeed, 64735),
        ]);
        let r = normalize(&ColumnLayout::standard(), &f, 42).unwrap();
        assert_eq!(r.state(), CuttingState::Cutting);
        assert_eq!(r.alarm_code, "0x01a2");
        assert!((r.head_height_mm - 250.5).abs() < 1e-9);
        assert!((r.motor_current_a - 22.1).abs() < 1e-9);
        assert!((r.motor_torque_percent - 7.5).abs() < 1e-9);
        assert!((r.descent_current_a - 3.5).abs() < 1e-9);
        assert!((r.band_deviation - 0.12).abs() < 1e-9);
        assert!((r.ambient_humidity_percent - 41.2).abs() < 1e-9);
        assert!((r.accel_y - 7.0).abs() < 1e-9);
        assert!((r.cutting_speed - 75.4).abs() < 1e-9);
        assert!((r.descent_speed - 48.0).abs() < 1e-9);
        assert_eq!(r.timestamp_ms, 42);
    }

    #[rstest]
    #[case(1600, 655.35 - 16.0)]
    #[case(1500, 15.0)]
    #[case(65000, 655.35 - 650.0)]
    fn descent_current_unwraps(#[case] raw: u16, #[case] expected: f64) {
        let f = frame_with(&[(Channel::DescentCurrentA, raw)]);
        let r = normalize(&ColumnLayout::standard(), &f, 0).unwrap();
        assert!((r.descent_current_a - expected).abs() < 1e-9);
    }

    #[rstest]
    #[case(150, 1.5)]
    #[case(151, 1.51 - 655.35)]
    #[case(65500, 655.0 - 655.35)]
    fn band_deviation_unwraps(#[case] raw: u16, #[case] expected: f64) {
        let f = frame_with(&[(Channel::BandDeviation, raw)]);
        let r = normalize(&ColumnLayout::standard(), &f, 0).unwrap();
        assert!((r.band_deviation - expected).abs() < 1e-9);
    }

    #[test]
    fn zero_descent_register_is_exactly_zero() {
        assert_eq!(descent_speed_from_raw(0), 0.0);
        assert!((descent_speed_from_raw(65535)).abs() < 1e-12);
        assert!((descent_speed_from_raw(1) - 3932.04).abs() < 1e-6);
    }

    #[test]
    fn wrong_length_is_malformed() {
        let err = normalize(&ColumnLayout::standard(), &[0; 5], 0).unwrap_err();
        assert_eq!(
            err,
            ControlError::Malformed {
                expected: 19,
                got: 5
            }
        );
    }

    #[test]
    fn custom_layout_reorders_and_defaults_missing_channels() {
        let layout = ColumnLayout::new(vec![
            Channel::CuttingSpeed,
            Channel::DescentSpeed,
            Channel::MotorCurrentA,
            Channel::HeadHeightMm,
            Channel::CuttingState,
        ])
        .unwrap();
        let r = normalize(&layout, &[1000, 0, 200, 100, 3], 0).unwrap();
        assert!((r.cutting_speed - 75.4).abs() < 1e-9);
        assert_eq!(r.descent_speed, 0.0);
        assert!((r.motor_current_a - 20.0).abs() < 1e-9);
        assert_eq!(r.alarm_code, "0x0000");
        assert_eq!(r.coolant_temp_c, 0.0);
    }

    #[rstest]
    #[case(vec![Channel::CuttingState, Channel::CuttingState], "more than once")]
    #[case(vec![Channel::CuttingState], "missing required channel")]
    #[case(vec![], "no channels")]
    fn layout_rejects_bad_column_lists(#[case] cols: Vec<Channel>, #[case] needle: &str) {
        let err = ColumnLayout::new(cols).unwrap_err();
        assert!(err.to_string().contains(needle), "{err}");
    }

    #[test]
    fn standard_layout_matches_new() {
        assert_eq!(
            ColumnLayout::standard(),
            ColumnLayout::new(Channel::DEFAULT_ORDER.to_vec()).unwrap()
        );
    }
}
