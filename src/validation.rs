//! Input gates for every mutating command.
//!
//! These are pure functions so they can be checked without a device: the
//! controller runs them before anything is queued, and the link task runs
//! the state-based ones again when the command is processed.

/// Lowest output voltage the converter accepts.
pub const DEFAULT_MIN_VOLTAGE: f32 = 20.0;
/// Highest output voltage the converter accepts.
pub const DEFAULT_MAX_VOLTAGE: f32 = 150.0;

/// Data sheet figures of the converter, shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConverterRatings {
    pub input_voltage: f32,
    pub output: VoltageLimits,
    pub power_watts: f32,
}

impl ConverterRatings {
    pub const DEFAULT: ConverterRatings = ConverterRatings {
        input_voltage: 400.0,
        output: VoltageLimits {
            min: DEFAULT_MIN_VOLTAGE,
            max: DEFAULT_MAX_VOLTAGE,
        },
        power_watts: 1500.0,
    };
}

impl std::fmt::Display for ConverterRatings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Input {:.0} Vdc, output {:.0}-{:.0} Vdc, {:.1} kW",
            self.input_voltage,
            self.output.min,
            self.output.max,
            self.power_watts / 1000.0
        )
    }
}

/// Inclusive range a set-voltage request must fall into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageLimits {
    pub min: f32,
    pub max: f32,
}

impl Default for VoltageLimits {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_VOLTAGE,
            max: DEFAULT_MAX_VOLTAGE,
        }
    }
}

/// Parse `raw` as a voltage and return it if it lies within `limits`.
pub fn parse_voltage(raw: &str, limits: VoltageLimits) -> Option<f32> {
    let voltage = raw.parse::<f32>().ok()?;
    // NaN fails both comparisons
    if voltage >= limits.min && voltage <= limits.max { Some(voltage) } else { None }
}

/// `true` iff `raw` parses to a number within `limits`.
pub fn validate_voltage(raw: &str, limits: VoltageLimits) -> bool {
    parse_voltage(raw, limits).is_some()
}

/// Quantize to the converter's 0.1 V resolution.
///
/// Half steps round to even (`100.25` becomes `100.2`, `100.75` becomes
/// `100.8`).
pub fn format_voltage(voltage: f32) -> f32 {
    (voltage * 10.0).round_ties_even() / 10.0
}

pub fn can_apply_voltage(validated: bool, connected: bool) -> bool {
    validated && connected
}

pub fn can_toggle_output(connected: bool, applied_voltage: f32) -> bool {
    connected && applied_voltage > 0.0
}
