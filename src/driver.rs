use embedded_hal::digital::{InputPin, PinState};
use libm::sqrtf;

use crate::calibration::{Multipliers, Resistors};
use crate::capture::{EdgeCapture, Mode};
use crate::estimator::WidthEstimator;
use crate::platform::{Clock, FastDigitalLine};

/// Maximum silence on a channel, in microseconds, before its reading is
/// considered stale. Matches the chip's lowest useful output frequency.
pub const DEFAULT_PULSE_TIMEOUT_US: u32 = 200_000;

/// One reading of a physical quantity.
///
/// `valid` is false whenever the backing pulse width is the invalidity
/// sentinel or a dependent reading is itself invalid. Callers should treat
/// an invalid reading as "no new data", not as an error.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    pub value: f32,
    pub valid: bool,
}

impl Measurement {
    fn from_pulse_width(width_us: u32, multiplier: f32) -> Self {
        // One output pulse covers a half cycle of the chip's measurement
        // window, hence the division by two.
        if width_us > 0 {
            Self {
                value: multiplier / width_us as f32 / 2.0,
                valid: true,
            }
        } else {
            Self {
                value: 0.0,
                valid: false,
            }
        }
    }
}

/// Initial configuration, consumed by [`Hlw8012Driver::new`].
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Hlw8012Config {
    /// Physical SEL level that selects CURRENT mode; board-wiring
    /// dependent.
    pub current_mode_level: PinState,
    /// Edge-interrupt discipline when true, blocking polling when false.
    pub use_interrupts: bool,
    /// Staleness/averaging timeout in microseconds.
    pub pulse_timeout_us: u32,
}

impl Default for Hlw8012Config {
    fn default() -> Self {
        Self {
            current_mode_level: PinState::High,
            use_interrupts: true,
            pulse_timeout_us: DEFAULT_PULSE_TIMEOUT_US,
        }
    }
}

/// Driver for the HLW8012 power monitoring chip.
///
/// The chip encodes active power on its CF output and, alternately,
/// current or voltage on CF1, selected by the SEL line. Pulse capture
/// state lives in a borrowed [`EdgeCapture`] so the application can
/// register the edge handlers with its interrupt facility; everything
/// else (calibration, unit conversion, derived quantities) lives here.
///
/// Pin direction and pull-up configuration are the platform's job, as is
/// wiring [`EdgeCapture::on_power_edge`] and
/// [`EdgeCapture::on_shared_edge`] to rising-edge interrupts when the
/// interrupt discipline is selected.
pub struct Hlw8012Driver<'a, CF, CF1, Sel, Clk, E> {
    capture: &'a EdgeCapture<Sel, Clk, E>,
    cf: CF,
    cf1: CF1,
    use_interrupts: bool,
    timeout_us: u32,
    resistors: Resistors,
    multipliers: Multipliers,
    current: f32,
    voltage: f32,
    power: f32,
}

impl<'a, CF, CF1, Sel, Clk, E> Hlw8012Driver<'a, CF, CF1, Sel, Clk, E>
where
    CF: InputPin,
    CF1: InputPin,
    Sel: FastDigitalLine,
    Clk: Clock,
    E: WidthEstimator,
{
    /// # Arguments
    ///
    /// * `capture`: The shared capture core; configured here and driven to
    /// the CURRENT-mode SEL level.
    /// * `cf_pin`: The power (CF) pulse input.
    /// * `cf1_pin`: The shared current/voltage (CF1) pulse input.
    /// * `config`: Discipline, SEL polarity and pulse timeout.
    pub fn new(
        capture: &'a EdgeCapture<Sel, Clk, E>,
        cf_pin: CF,
        cf1_pin: CF1,
        config: Hlw8012Config,
    ) -> Self {
        capture.configure(
            config.current_mode_level,
            config.use_interrupts,
            config.pulse_timeout_us,
        );
        let resistors = Resistors::default();
        Self {
            capture,
            cf: cf_pin,
            cf1: cf1_pin,
            use_interrupts: config.use_interrupts,
            timeout_us: config.pulse_timeout_us,
            multipliers: Multipliers::from_resistors(&resistors),
            resistors,
            current: 0.0,
            voltage: 0.0,
            power: 0.0,
        }
    }

    /// RMS current through the shunt, in amperes.
    pub fn current(&mut self) -> Measurement {
        if self.power == 0.0 {
            // No power flow implies no current flow; without this, stale
            // current pulses would report phantom current after a load
            // switches off.
            self.capture.set_current_width_us(0);
        } else if self.use_interrupts {
            self.capture.check_shared_signal();
        } else if self.capture.mode() == Mode::Current {
            let width = pulse_in(&mut self.cf1, self.capture.clock(), self.timeout_us);
            self.capture.set_current_width_us(width);
        }
        let m = Measurement::from_pulse_width(
            self.capture.current_width_us(),
            self.multipliers.current,
        );
        self.current = m.value;
        m
    }

    /// RMS mains voltage, in volts.
    pub fn voltage(&mut self) -> Measurement {
        if self.use_interrupts {
            self.capture.check_shared_signal();
        } else if self.capture.mode() == Mode::Voltage {
            let width = pulse_in(&mut self.cf1, self.capture.clock(), self.timeout_us);
            self.capture.set_voltage_width_us(width);
        }
        let m = Measurement::from_pulse_width(
            self.capture.voltage_width_us(),
            self.multipliers.voltage,
        );
        self.voltage = m.value;
        m
    }

    /// Active power, in watts.
    pub fn active_power(&mut self) -> Measurement {
        if self.use_interrupts {
            self.capture.check_power_signal();
        } else {
            let width = pulse_in(&mut self.cf, self.capture.clock(), self.timeout_us);
            self.capture.set_power_width_us(width);
        }
        let m =
            Measurement::from_pulse_width(self.capture.power_width_us(), self.multipliers.power);
        self.power = m.value;
        m
    }

    /// Apparent power, in volt-amperes.
    pub fn apparent_power(&mut self) -> Measurement {
        let current = self.current();
        let voltage = self.voltage();
        Measurement {
            value: voltage.value * current.value,
            valid: current.valid && voltage.valid,
        }
    }

    /// Reactive power, in volt-amperes reactive.
    pub fn reactive_power(&mut self) -> Measurement {
        let active = self.active_power();
        let apparent = self.apparent_power();
        reactive_from(active, apparent)
    }

    /// Ratio of active to apparent power, clamped to `[0, 1]`.
    pub fn power_factor(&mut self) -> Measurement {
        let active = self.active_power();
        let apparent = self.apparent_power();
        power_factor_from(active, apparent)
    }

    /// Accumulated energy since the last [`Hlw8012Driver::reset_energy`],
    /// in watt-seconds.
    ///
    /// Energy is the CF pulse total times the power multiplier (P = m·f
    /// and E = P·t collapse to E = m·N). Counting every pulse needs the
    /// interrupt discipline; under polling this always returns zero.
    pub fn energy(&self) -> f32 {
        if !self.use_interrupts {
            return 0.0;
        }
        self.capture.energy_pulse_count() as f32 * self.multipliers.power / 1_000_000.0 / 2.0
    }

    pub fn reset_energy(&self) {
        self.capture.reset_energy();
    }

    pub fn set_mode(&self, mode: Mode) {
        self.capture.set_mode(mode);
    }

    pub fn mode(&self) -> Mode {
        self.capture.mode()
    }

    pub fn toggle_mode(&self) -> Mode {
        self.capture.toggle_mode()
    }

    /// Adjusts the current multiplier so that the present reading reports
    /// `reference` amperes. Silently does nothing unless a valid nonzero
    /// reading and a positive reference are available.
    pub fn expected_current(&mut self, reference: f32) {
        if self.current == 0.0 {
            self.current();
        }
        if reference > 0.0 && self.current > 0.0 {
            self.multipliers.current *= reference / self.current;
        }
    }

    /// As [`Hlw8012Driver::expected_current`], for volts.
    pub fn expected_voltage(&mut self, reference: f32) {
        if self.voltage == 0.0 {
            self.voltage();
        }
        if reference > 0.0 && self.voltage > 0.0 {
            self.multipliers.voltage *= reference / self.voltage;
        }
    }

    /// As [`Hlw8012Driver::expected_current`], for watts.
    pub fn expected_active_power(&mut self, reference: f32) {
        if self.power == 0.0 {
            self.active_power();
        }
        if reference > 0.0 && self.power > 0.0 {
            self.multipliers.power *= reference / self.power;
        }
    }

    /// Recomputes the multipliers from the supplied resistor network. A
    /// non-positive downstream divider value rejects the whole call; a
    /// non-positive shunt value keeps the previous shunt.
    pub fn set_resistors(&mut self, shunt_ohms: f32, upstream_ohms: f32, downstream_ohms: f32) {
        if self.resistors.set(shunt_ohms, upstream_ohms, downstream_ohms) {
            self.multipliers = Multipliers::from_resistors(&self.resistors);
        }
    }

    /// Discards any calibration adjustments, recomputing the multipliers
    /// from the last-known resistor network.
    pub fn reset_multipliers(&mut self) {
        self.multipliers = Multipliers::from_resistors(&self.resistors);
    }

    pub fn multipliers(&self) -> Multipliers {
        self.multipliers
    }

    /// Restores a persisted current multiplier; ignored unless positive.
    pub fn set_current_multiplier(&mut self, multiplier: f32) {
        if multiplier > 0.0 {
            self.multipliers.current = multiplier;
        }
    }

    /// Restores a persisted voltage multiplier; ignored unless positive.
    pub fn set_voltage_multiplier(&mut self, multiplier: f32) {
        if multiplier > 0.0 {
            self.multipliers.voltage = multiplier;
        }
    }

    /// Restores a persisted power multiplier; ignored unless positive.
    pub fn set_power_multiplier(&mut self, multiplier: f32) {
        if multiplier > 0.0 {
            self.multipliers.power = multiplier;
        }
    }
}

fn reactive_from(active: Measurement, apparent: Measurement) -> Measurement {
    let value = if apparent.value > active.value {
        sqrtf(apparent.value * apparent.value - active.value * active.value)
    } else {
        0.0
    };
    Measurement {
        value,
        valid: active.valid && apparent.valid,
    }
}

fn power_factor_from(active: Measurement, apparent: Measurement) -> Measurement {
    let valid = active.valid && apparent.valid;
    let value = if active.value > apparent.value {
        1.0
    } else if apparent.value == 0.0 {
        0.0
    } else {
        active.value / apparent.value
    };
    Measurement { value, valid }
}

/// Blocking measurement of one HIGH pulse on `pin`, in microseconds.
///
/// Waits out any pulse already in progress, then times the next full HIGH
/// phase. Any stage exceeding `timeout_us` yields the invalidity sentinel,
/// as does a pin read error (treated as a low line).
fn pulse_in<P: InputPin, Clk: Clock>(pin: &mut P, clock: &Clk, timeout_us: u32) -> u32 {
    let start = clock.now_micros();
    let expired = |clock: &Clk| clock.now_micros().wrapping_sub(start) > timeout_us;

    while is_high(pin) {
        if expired(clock) {
            return 0;
        }
    }
    while !is_high(pin) {
        if expired(clock) {
            return 0;
        }
    }
    let rise = clock.now_micros();
    while is_high(pin) {
        if expired(clock) {
            return 0;
        }
    }
    clock.now_micros().wrapping_sub(rise)
}

fn is_high<P: InputPin>(pin: &mut P) -> bool {
    matches!(pin.is_high(), Ok(true))
}
