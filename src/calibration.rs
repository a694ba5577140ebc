//! Multiplier math for the HLW8012's frequency outputs.
//!
//! Each multiplier divided by an output period in microseconds gives the
//! physical value. Roughly, per the datasheet: 1 Hz on CF is about 12 W,
//! 1 Hz on CF1 about 15 mA in current mode and about 0.5 V in voltage mode.

/// Internal reference voltage of the chip, in volts.
const V_REF: f32 = 2.43;

/// Frequency of the chip's internal oscillator, in hertz.
const F_OSC: f32 = 3_579_000.0;

/// Shunt value the commercial boards (Sonoff POW et al.) ship with.
pub const DEFAULT_SHUNT_OHMS: f32 = 0.001;

/// Upstream side of the stock voltage divider: five 470 kOhm in series.
pub const DEFAULT_UPSTREAM_OHMS: f32 = 5.0 * 470_000.0;

/// Downstream side of the stock voltage divider.
pub const DEFAULT_DOWNSTREAM_OHMS: f32 = 1_000.0;

/// The resistor network around the chip, reduced to the two figures the
/// multiplier formulas need.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Resistors {
    shunt_ohms: f32,
    divider_ratio: f32,
}

impl Resistors {
    pub(crate) fn default() -> Self {
        Self {
            shunt_ohms: DEFAULT_SHUNT_OHMS,
            divider_ratio: (DEFAULT_UPSTREAM_OHMS + DEFAULT_DOWNSTREAM_OHMS)
                / DEFAULT_DOWNSTREAM_OHMS,
        }
    }

    /// Replaces the network. A non-positive downstream resistor would put a
    /// zero in the divider denominator, so the whole call is rejected; a
    /// non-positive shunt keeps the previous shunt but still updates the
    /// divider.
    pub(crate) fn set(&mut self, shunt_ohms: f32, upstream_ohms: f32, downstream_ohms: f32) -> bool {
        if downstream_ohms <= 0.0 {
            return false;
        }
        if shunt_ohms > 0.0 {
            self.shunt_ohms = shunt_ohms;
        }
        self.divider_ratio = (upstream_ohms + downstream_ohms) / downstream_ohms;
        true
    }
}

/// Scale factors converting pulse widths into amperes, volts and watts.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Multipliers {
    pub current: f32,
    pub voltage: f32,
    pub power: f32,
}

impl Multipliers {
    /// Datasheet formulas relating output frequency to the measured
    /// quantity, scaled to microsecond periods.
    pub(crate) fn from_resistors(r: &Resistors) -> Self {
        Self {
            current: 1_000_000.0 * 512.0 * V_REF / r.shunt_ohms / 24.0 / F_OSC,
            voltage: 1_000_000.0 * 512.0 * V_REF * r.divider_ratio / 2.0 / F_OSC,
            power: 1_000_000.0 * 128.0 * V_REF * V_REF * r.divider_ratio
                / r.shunt_ohms
                / 48.0
                / F_OSC,
        }
    }
}
