#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and speed-table parsing for the band-saw control loop.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - The register layout is a list of named channels in register order.
//! - The speed-table CSV loader enforces headers and strictly monotonic heights.
use serde::Deserialize;

/// One named register in the raw frame read from the saw controller.
///
/// The order of channels in `[layout] columns` is the order of the holding
/// registers on the wire; each channel implies its own scaling.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    CuttingState,
    AlarmStatus,
    AlarmCode,
    HeadHeightMm,
    MotorCurrentA,
    MotorTorquePercent,
    DescentCurrentA,
    ClampPressureBar,
    BandTensionBar,
    BandDeviation,
    AmbientTempC,
    AmbientHumidityPercent,
    CoolantTempC,
    HydraulicOilTempC,
    AccelX,
    AccelY,
    AccelZ,
    DescentSpeed,
    CuttingSpeed,
}

impl Channel {
    /// Factory register order of the saw controller.
    pub const DEFAULT_ORDER: [Self; 19] = [
        Self::CuttingState,
        Self::AlarmStatus,
        Self::AlarmCode,
        Self::HeadHeightMm,
        Self::MotorCurrentA,
        Self::MotorTorquePercent,
        Self::DescentCurrentA,
        Self::ClampPressureBar,
        Self::BandTensionBar,
        Self::BandDeviation,
        Self::AmbientTempC,
        Self::AmbientHumidityPercent,
        Self::CoolantTempC,
        Self::HydraulicOilTempC,
        Self::AccelX,
        Self::AccelY,
        Self::AccelZ,
        Self::DescentSpeed,
        Self::CuttingSpeed,
    ];

    /// Channels the control loop cannot run without.
    pub const REQUIRED: [Self; 5] = [
        Self::CuttingState,
        Self::HeadHeightMm,
        Self::MotorCurrentA,
        Self::DescentSpeed,
        Self::CuttingSpeed,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::CuttingState => "cutting_state",
            Self::AlarmStatus => "alarm_status",
            Self::AlarmCode => "alarm_code",
            Self::HeadHeightMm => "head_height_mm",
            Self::MotorCurrentA => "motor_current_a",
            Self::MotorTorquePercent => "motor_torque_percent",
            Self::DescentCurrentA => "descent_current_a",
            Self::ClampPressureBar => "clamp_pressure_bar",
            Self::BandTensionBar => "band_tension_bar",
            Self::BandDeviation => "band_deviation",
            Self::AmbientTempC => "ambient_temp_c",
            Self::AmbientHumidityPercent => "ambient_humidity_percent",
            Self::CoolantTempC => "coolant_temp_c",
            Self::HydraulicOilTempC => "hydraulic_oil_temp_c",
            Self::AccelX => "accel_x",
            Self::AccelY => "accel_y",
            Self::AccelZ => "accel_z",
            Self::DescentSpeed => "descent_speed",
            Self::CuttingSpeed => "cutting_speed",
        }
    }
}

/// Which correction strategy drives the actuators.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Off,
    #[default]
    Fuzzy,
    Linear,
}

impl ControlMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Fuzzy => "fuzzy",
            Self::Linear => "linear",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FieldbusCfg {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// First holding register of the sensor frame.
    pub start_address: u16,
    /// Optional explicit frame length; must match `layout.columns` when set.
    pub register_count: Option<u16>,
    /// Socket read/write timeout (ms).
    pub timeout_ms: u64,
    /// Cutting-speed setpoint register (plain unsigned magnitude).
    pub cutting_register: u16,
    /// Descent-speed setpoint register (sign-bit packed).
    pub descent_register: u16,
}

impl Default for FieldbusCfg {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            start_address: 0,
            register_count: None,
            timeout_ms: 500,
            cutting_register: 2066,
            descent_register: 2041,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LayoutCfg {
    pub columns: Vec<Channel>,
}

impl Default for LayoutCfg {
    fn default() -> Self {
        Self {
            columns: Channel::DEFAULT_ORDER.to_vec(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControlCfg {
    pub mode: ControlMode,
    /// Minimum sleep between bus polls (ms).
    pub poll_interval_ms: u64,
    /// Minimum spacing between actuator writes (ms).
    pub speed_adjustment_interval_ms: u64,
    /// Corrections are measured but not applied this long after a cut starts (ms).
    pub settle_ms: u64,
    /// Descent speed is never driven below this while slowing down.
    pub descent_floor: f64,
    /// Cutting speed is never driven above this while speeding up.
    pub cutting_ceiling: f64,
    /// Descent multiplier used when the correction slows the saw down.
    pub descent_gain: f64,
    /// Scale applied to the cutting multiplier.
    pub cutting_gain_scale: f64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            mode: ControlMode::Fuzzy,
            poll_interval_ms: 100,
            speed_adjustment_interval_ms: 200,
            settle_ms: 5_000,
            descent_floor: 20.0,
            cutting_ceiling: 100.0,
            descent_gain: 0.1,
            cutting_gain_scale: 0.7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RatioCfg {
    /// Starting descent:cutting ratio in percent, used until a cut is observed.
    pub initial_percent: f64,
    pub check_interval_ms: u64,
    /// Cutting-speed drift that triggers a ratio nudge.
    pub drift_threshold: f64,
    pub nudge_percent: f64,
    pub tolerance_percent: f64,
    /// Speed step used while enforcing the ratio.
    pub step: f64,
    pub max_iterations: u32,
}

impl Default for RatioCfg {
    fn default() -> Self {
        Self {
            initial_percent: 55.0 / 78.0 * 100.0,
            check_interval_ms: 500,
            drift_threshold: 0.5,
            nudge_percent: 3.0,
            tolerance_percent: 1.0,
            step: 0.1,
            max_iterations: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FuzzyCfg {
    /// Sampling step of the output universe used for centroid defuzzification.
    pub resolution: f64,
}

impl Default for FuzzyCfg {
    fn default() -> Self {
        Self { resolution: 0.01 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LinearCfg {
    pub multiplier: f64,
    pub min_speed: f64,
    pub max_speed: f64,
    /// Optional CSV overriding the built-in height table.
    pub table_csv: Option<String>,
}

impl Default for LinearCfg {
    fn default() -> Self {
        Self {
            multiplier: 1.2,
            min_speed: 5.0,
            max_speed: 101.0,
            table_csv: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryCfg {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Fraction of each delay randomized, in [0.0, 1.0].
    pub jitter: f64,
    /// Fixed delay between reconnect attempts (ms).
    pub reconnect_delay_ms: u64,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            jitter: 0.2,
            reconnect_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SinksCfg {
    /// Path of the per-cycle CSV row store; disabled when absent.
    pub persist_csv: Option<String>,
    /// Path of the JSON-lines telemetry stream; disabled when absent.
    pub telemetry_jsonl: Option<String>,
    pub queue_capacity: usize,
    /// Entries kept in the in-memory recent history.
    pub history_len: usize,
}

impl Default for SinksCfg {
    fn default() -> Self {
        Self {
            persist_csv: None,
            telemetry_jsonl: None,
            queue_capacity: 256,
            history_len: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub fieldbus: FieldbusCfg,
    pub layout: LayoutCfg,
    pub control: ControlCfg,
    pub ratio: RatioCfg,
    pub fuzzy: FuzzyCfg,
    pub linear: LinearCfg,
    pub retry: RetryCfg,
    pub sinks: SinksCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Speed-table CSV schema.
///
/// Expected headers:
/// height_mm,cutting_speed,descent_speed
///
/// Example:
/// height_mm,cutting_speed,descent_speed
/// 300,78,55
/// 290,76,52
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct SpeedTableRow {
    pub height_mm: f64,
    pub cutting_speed: f64,
    pub descent_speed: f64,
}

/// Check a speed table: at least two rows, finite values, strictly monotonic
/// heights (either direction).
pub fn validate_speed_table(rows: &[SpeedTableRow]) -> eyre::Result<()> {
    if rows.len() < 2 {
        eyre::bail!("speed table requires at least two rows, got {}", rows.len());
    }
    for (i, r) in rows.iter().enumerate() {
        if !(r.height_mm.is_finite() && r.cutting_speed.is_finite() && r.descent_speed.is_finite())
        {
            eyre::bail!("speed table row {} has a non-finite value", i);
        }
    }

    let mut dir: i8 = 0;
    for i in 1..rows.len() {
        let d = rows[i].height_mm - rows[i - 1].height_mm;
        if d == 0.0 {
            eyre::bail!(
                "speed table has duplicate heights at index {} and {}",
                i - 1,
                i
            );
        }
        let step_dir = if d > 0.0 { 1 } else { -1 };
        if dir == 0 {
            dir = step_dir;
        } else if dir != step_dir {
            eyre::bail!(
                "speed table heights must be monotonic (strictly increasing or strictly decreasing)"
            );
        }
    }
    Ok(())
}

pub fn load_speed_table_csv(path: &std::path::Path) -> eyre::Result<Vec<SpeedTableRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open speed table CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["height_mm", "cutting_speed", "descent_speed"];
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != expected {
        eyre::bail!(
            "speed table CSV must have headers 'height_mm,cutting_speed,descent_speed', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<SpeedTableRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    validate_speed_table(&rows)?;
    Ok(rows)
}

fn positive_finite(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

impl Config {
    /// Number of holding registers read per cycle.
    pub fn register_count(&self) -> usize {
        self.layout.columns.len()
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Fieldbus
        if self.fieldbus.host.trim().is_empty() {
            eyre::bail!("fieldbus.host must not be empty");
        }
        if self.fieldbus.port == 0 {
            eyre::bail!("fieldbus.port must be > 0");
        }
        if self.fieldbus.timeout_ms == 0 {
            eyre::bail!("fieldbus.timeout_ms must be >= 1");
        }
        if self.fieldbus.cutting_register == self.fieldbus.descent_register {
            eyre::bail!("fieldbus.cutting_register and fieldbus.descent_register must differ");
        }

        // Layout
        let columns = &self.layout.columns;
        if columns.is_empty() {
            eyre::bail!("layout.columns must list at least one channel");
        }
        if columns.len() > 125 {
            eyre::bail!("layout.columns must have at most 125 channels (one bus read)");
        }
        for (i, c) in columns.iter().enumerate() {
            if columns[..i].contains(c) {
                eyre::bail!("layout.columns lists {} more than once", c.name());
            }
        }
        for req in Channel::REQUIRED {
            if !columns.contains(&req) {
                eyre::bail!("layout.columns is missing required channel {}", req.name());
            }
        }
        if let Some(n) = self
            .fieldbus
            .register_count
            .filter(|n| usize::from(*n) != columns.len())
        {
            eyre::bail!(
                "fieldbus.register_count ({}) must equal the number of layout.columns ({})",
                n,
                columns.len()
            );
        }

        // Control
        if self.control.poll_interval_ms == 0 {
            eyre::bail!("control.poll_interval_ms must be >= 1");
        }
        if self.control.settle_ms > 10 * 60 * 1000 {
            eyre::bail!("control.settle_ms is unreasonably large (>10min)");
        }
        if !(self.control.descent_floor.is_finite() && self.control.descent_floor >= 0.0) {
            eyre::bail!("control.descent_floor must be >= 0");
        }
        if !positive_finite(self.control.cutting_ceiling) {
            eyre::bail!("control.cutting_ceiling must be > 0");
        }
        if !positive_finite(self.control.descent_gain) {
            eyre::bail!("control.descent_gain must be > 0");
        }
        if !positive_finite(self.control.cutting_gain_scale) {
            eyre::bail!("control.cutting_gain_scale must be > 0");
        }

        // Ratio
        if !positive_finite(self.ratio.initial_percent) {
            eyre::bail!("ratio.initial_percent must be > 0");
        }
        if self.ratio.check_interval_ms == 0 {
            eyre::bail!("ratio.check_interval_ms must be >= 1");
        }
        if !positive_finite(self.ratio.drift_threshold) {
            eyre::bail!("ratio.drift_threshold must be > 0");
        }
        if !(self.ratio.nudge_percent.is_finite() && self.ratio.nudge_percent >= 0.0) {
            eyre::bail!("ratio.nudge_percent must be >= 0");
        }
        if !positive_finite(self.ratio.tolerance_percent) {
            eyre::bail!("ratio.tolerance_percent must be > 0");
        }
        if !positive_finite(self.ratio.step) {
            eyre::bail!("ratio.step must be > 0");
        }
        if self.ratio.max_iterations == 0 {
            eyre::bail!("ratio.max_iterations must be >= 1");
        }

        // Fuzzy
        if !(self.fuzzy.resolution > 0.0 && self.fuzzy.resolution <= 1.0) {
            eyre::bail!("fuzzy.resolution must be in (0.0, 1.0]");
        }

        // Linear
        if !positive_finite(self.linear.multiplier) {
            eyre::bail!("linear.multiplier must be > 0");
        }
        if !(self.linear.min_speed.is_finite() && self.linear.min_speed >= 0.0) {
            eyre::bail!("linear.min_speed must be >= 0");
        }
        if !(self.linear.max_speed.is_finite() && self.linear.max_speed > self.linear.min_speed) {
            eyre::bail!("linear.max_speed must be > linear.min_speed");
        }

        // Retry
        if self.retry.initial_backoff_ms == 0 {
            eyre::bail!("retry.initial_backoff_ms must be >= 1");
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            eyre::bail!("retry.max_backoff_ms must be >= retry.initial_backoff_ms");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            eyre::bail!("retry.jitter must be in [0.0, 1.0]");
        }
        if self.retry.reconnect_delay_ms == 0 {
            eyre::bail!("retry.reconnect_delay_ms must be >= 1");
        }

        // Sinks
        if self.sinks.queue_capacity == 0 {
            eyre::bail!("sinks.queue_capacity must be >= 1");
        }
        if self.sinks.history_len == 0 {
            eyre::bail!("sinks.history_len must be >= 1");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref() {
            if !matches!(rot, "never" | "daily" | "hourly") {
                eyre::bail!("logging.rotation must be one of never|daily|hourly");
            }
        }

        Ok(())
    }
}
