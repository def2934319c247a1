//! In-process band-saw model that speaks the same register protocol as the
//! real controller.
//!
//! The saw idles for a few reads, then cuts downward from the top of the
//! stroke until the head reaches the bottom, then idles again. Motor current
//! follows the commanded speeds, so a closed loop settles the current.
use std::sync::{Arc, Mutex, MutexGuard};

use saw_config::Channel;
use saw_traits::{BoxError, FieldBus};

use crate::error::HwError;

const CUTTING_STATE_CUTTING: u16 = 3;
const CUTTING_STATE_IDLE: u16 = 0;

#[derive(Debug, Clone)]
pub struct SimProfile {
    /// Reads spent idle between cuts.
    pub idle_reads: u32,
    /// Head height at the start of each cut (mm).
    pub stroke_mm: f64,
    /// Head travel per read per unit of descent speed (mm).
    pub travel_per_speed: f64,
    pub initial_cutting_speed: f64,
    pub initial_descent_speed: f64,
    /// Current draw with the blade running but no feed (A).
    pub base_current_a: f64,
    /// Additional amps per unit of descent speed.
    pub current_per_descent: f64,
    /// Additional amps per unit of cutting speed.
    pub current_per_cutting: f64,
    pub cutting_register: u16,
    pub descent_register: u16,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            idle_reads: 5,
            stroke_mm: 300.0,
            travel_per_speed: 0.01,
            initial_cutting_speed: 70.0,
            initial_descent_speed: 50.0,
            base_current_a: 12.0,
            current_per_descent: 0.25,
            current_per_cutting: 0.08,
            cutting_register: 2066,
            descent_register: 2041,
        }
    }
}

#[derive(Debug)]
struct SimState {
    profile: SimProfile,
    layout: Vec<Channel>,
    reads: u64,
    idle_left: u32,
    cutting: bool,
    head_mm: f64,
    cutting_speed: f64,
    descent_speed: f64,
    connected: bool,
    fail_reads: u32,
    refuse_reconnects: u32,
    writes: Vec<(u16, u16)>,
}

impl SimState {
    fn advance(&mut self) {
        self.reads += 1;
        if self.cutting {
            self.head_mm -= self.descent_speed.max(0.0) * self.profile.travel_per_speed;
            if self.head_mm <= 0.0 {
                self.head_mm = 0.0;
                self.cutting = false;
                self.idle_left = self.profile.idle_reads;
                tracing::debug!(reads = self.reads, "sim cut finished");
            }
        } else if self.idle_left > 0 {
            self.idle_left -= 1;
        } else {
            self.cutting = true;
            self.head_mm = self.profile.stroke_mm;
            tracing::debug!(reads = self.reads, "sim cut started");
        }
    }

    fn motor_current(&self) -> f64 {
        if !self.cutting {
            return 2.0;
        }
        let p = &self.profile;
        // Small deterministic ripple so consecutive deltas are not all zero.
        let ripple = ((self.reads % 7) as f64 - 3.0) * 0.05;
        p.base_current_a
            + p.current_per_descent * self.descent_speed
            + p.current_per_cutting * self.cutting_speed
            + ripple
    }

    fn raw(&self, channel: Channel) -> u16 {
        let tenths = |v: f64| to_reg(v * 10.0);
        match channel {
            Channel::CuttingState => {
                if self.cutting {
                    CUTTING_STATE_CUTTING
                } else {
                    CUTTING_STATE_IDLE
                }
            }
            Channel::AlarmStatus | Channel::AlarmCode => 0,
            Channel::HeadHeightMm => tenths(self.head_mm),
            Channel::MotorCurrentA => tenths(self.motor_current()),
            Channel::MotorTorquePercent => tenths(self.motor_current() * 1.5),
            Channel::DescentCurrentA => to_reg(if self.cutting { 350.0 } else { 0.0 }),
            Channel::ClampPressureBar => tenths(60.0),
            Channel::BandTensionBar => tenths(150.0),
            Channel::BandDeviation => 12,
            Channel::AmbientTempC => tenths(24.5),
            Channel::AmbientHumidityPercent => tenths(41.0),
            Channel::CoolantTempC => tenths(22.0),
            Channel::HydraulicOilTempC => tenths(38.0),
            Channel::AccelX | Channel::AccelY | Channel::AccelZ => 0,
            Channel::CuttingSpeed => to_reg((self.cutting_speed / 0.0754).round()),
            Channel::DescentSpeed => {
                if self.descent_speed <= 0.0 {
                    0
                } else {
                    to_reg((65535.0 - self.descent_speed / 0.06).round())
                }
            }
        }
    }
}

fn to_reg(v: f64) -> u16 {
    v.round().clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Shared view of a running simulation, for tests and the CLI.
#[derive(Debug, Clone)]
pub struct SimHandle(Arc<Mutex<SimState>>);

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Every `(address, value)` written so far.
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.lock().writes.clone()
    }

    /// Current (cutting, descent) speeds in engineering units.
    pub fn speeds(&self) -> (f64, f64) {
        let s = self.lock();
        (s.cutting_speed, s.descent_speed)
    }

    pub fn is_cutting(&self) -> bool {
        self.lock().cutting
    }

    /// Fail the next `n` reads; each failure drops the link.
    pub fn fail_next_reads(&self, n: u32) {
        self.lock().fail_reads = n;
    }

    /// Refuse the next `n` reconnect attempts.
    pub fn refuse_reconnects(&self, n: u32) {
        self.lock().refuse_reconnects = n;
    }
}

pub struct SimulatedSaw {
    state: SimHandle,
}

impl SimulatedSaw {
    pub fn new(layout: Vec<Channel>, profile: SimProfile) -> Self {
        let state = SimState {
            layout,
            reads: 0,
            idle_left: profile.idle_reads,
            cutting: false,
            head_mm: profile.stroke_mm,
            cutting_speed: profile.initial_cutting_speed,
            descent_speed: profile.initial_descent_speed,
            connected: true,
            fail_reads: 0,
            refuse_reconnects: 0,
            writes: Vec::new(),
            profile,
        };
        Self {
            state: SimHandle(Arc::new(Mutex::new(state))),
        }
    }

    pub fn with_default_layout() -> Self {
        Self::new(Channel::DEFAULT_ORDER.to_vec(), SimProfile::default())
    }

    pub fn handle(&self) -> SimHandle {
        self.state.clone()
    }
}

impl FieldBus for SimulatedSaw {
    fn read_holding_registers(&mut self, _start: u16, count: u16) -> Result<Vec<u16>, BoxError> {
        let mut s = self.state.lock();
        if !s.connected {
            return Err(Box::new(HwError::Disconnected));
        }
        if s.fail_reads > 0 {
            s.fail_reads -= 1;
            s.connected = false;
            return Err(Box::new(HwError::Disconnected));
        }
        s.advance();
        let frame: Vec<u16> = s.layout.iter().map(|c| s.raw(*c)).collect();
        if frame.len() != usize::from(count) {
            tracing::trace!(
                requested = count,
                available = frame.len(),
                "sim frame length differs from request"
            );
        }
        Ok(frame.into_iter().take(usize::from(count)).collect())
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), BoxError> {
        let mut s = self.state.lock();
        if !s.connected {
            return Err(Box::new(HwError::Disconnected));
        }
        if address == s.profile.cutting_register {
            s.cutting_speed = f64::from(value) * 0.0754;
        } else if address == s.profile.descent_register {
            // Bit 15 set means non-negative; the low 15 bits plus the set
            // bit reconstruct the descent encoding.
            s.descent_speed = if value & 0x8000 != 0 {
                (f64::from(value) - 65535.0) * -0.06
            } else {
                0.0
            };
        } else {
            return Err(Box::new(HwError::Exception {
                function: 0x06,
                code: 0x02,
            }));
        }
        s.writes.push((address, value));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn reconnect(&mut self) -> Result<(), BoxError> {
        let mut s = self.state.lock();
        if s.refuse_reconnects > 0 {
            s.refuse_reconnects -= 1;
            return Err(Box::new(HwError::Disconnected));
        }
        s.connected = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idles_then_starts_cutting() {
        let mut saw = SimulatedSaw::with_default_layout();
        for _ in 0..5 {
            let f = saw.read_holding_registers(0, 19).unwrap();
            assert_eq!(f[0], CUTTING_STATE_IDLE);
        }
        let f = saw.read_holding_registers(0, 19).unwrap();
        assert_eq!(f[0], CUTTING_STATE_CUTTING);
        assert_eq!(f[3], 3000);
    }

    #[test]
    fn writes_update_speeds() {
        let mut saw = SimulatedSaw::with_default_layout();
        let h = saw.handle();
        saw.write_register(2066, 800).unwrap();
        saw.write_register(2041, 64735).unwrap();
        let (c, d) = h.speeds();
        assert!((c - 60.32).abs() < 1e-9);
        assert!((d - 48.0).abs() < 1e-9);
        assert_eq!(h.writes(), vec![(2066, 800), (2041, 64735)]);
    }

    #[test]
    fn unknown_register_is_rejected() {
        let mut saw = SimulatedSaw::with_default_layout();
        assert!(saw.write_register(1, 1).is_err());
    }

    #[test]
    fn failure_injection_requires_reconnect() {
        let mut saw = SimulatedSaw::with_default_layout();
        saw.handle().fail_next_reads(1);
        assert!(saw.read_holding_registers(0, 19).is_err());
        assert!(!saw.is_connected());
        assert!(saw.reconnect().is_ok());
        assert!(saw.read_holding_registers(0, 19).is_ok());
    }
}
